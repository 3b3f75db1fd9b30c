//! Tracing layer that forwards ERROR events to the marketplace admin's
//! Telegram chat. Sends are throttled and deduplicated so a cascading
//! failure doesn't flood the chat, and the HTTP call is spawned onto the
//! runtime so logging never blocks a request.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Minimum interval between Telegram messages.
const THROTTLE: Duration = Duration::from_secs(15);
/// Window during which a repeated identical message is dropped.
const DEDUP_WINDOW: Duration = Duration::from_secs(120);

// ── Layer ──

pub struct TelegramLayer {
    bot_token: String,
    chat_id: i64,
    http: reqwest::Client,
    state: Mutex<NotifyState>,
}

struct NotifyState {
    last_sent: Option<Instant>,
    last_hash: u64,
    last_hash_at: Option<Instant>,
}

impl TelegramLayer {
    pub fn new(bot_token: String, chat_id: i64) -> Self {
        Self {
            bot_token,
            chat_id,
            http: reqwest::Client::new(),
            state: Mutex::new(NotifyState {
                last_sent: None,
                last_hash: 0,
                last_hash_at: None,
            }),
        }
    }

    /// Decides whether a message with this hash may go out now, updating
    /// the throttle/dedup state when it may.
    fn should_send(&self, hash: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        if let (h, Some(at)) = (state.last_hash, state.last_hash_at) {
            if h == hash && now.duration_since(at) < DEDUP_WINDOW {
                return false;
            }
        }
        if let Some(at) = state.last_sent {
            if now.duration_since(at) < THROTTLE {
                return false;
            }
        }

        state.last_sent = Some(now);
        state.last_hash = hash;
        state.last_hash_at = Some(now);
        true
    }
}

impl<S: Subscriber> Layer<S> for TelegramLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };
        if !self.should_send(hash) {
            return;
        }

        let target = event.metadata().target();
        let now_utc = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let text = format!("🚨 Ошибка сервера\n\n{message}\n\n{target}\n{now_utc}");

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let http = self.http.clone();
        let chat_id = self.chat_id;

        // spawn only when a runtime is available (tests log without one)
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = http
                    .post(&url)
                    .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
                    .send()
                    .await;
            });
        }
    }
}

// ── Field visitor ──

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl MessageVisitor {
    fn message(self) -> String {
        self.message.unwrap_or_else(|| "<no message>".into())
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> TelegramLayer {
        TelegramLayer::new("token".into(), 1)
    }

    #[test]
    fn test_first_message_goes_out() {
        assert!(layer().should_send(42));
    }

    #[test]
    fn test_identical_message_deduplicated() {
        let layer = layer();
        assert!(layer.should_send(42));
        assert!(!layer.should_send(42));
    }

    #[test]
    fn test_different_message_throttled() {
        let layer = layer();
        assert!(layer.should_send(1));
        // different hash, but inside the throttle interval
        assert!(!layer.should_send(2));
    }
}
