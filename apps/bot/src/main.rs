//! Telegram companion bot for the rental Mini-App: entry button into the
//! webapp, a guest's upcoming bookings, the owner's check-in digest, and
//! a day-before check-in reminder loop.
//!
//! Guests arriving through the Mini-App are identified by their Telegram
//! id, stored as the booking's `created_by`, which is what the reminder
//! loop relies on.

use sqlx::sqlite::SqlitePoolOptions;
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, WebAppInfo},
    utils::command::BotCommands,
};
use tokio::time::{interval, Duration};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "Открыть каталог квартир")]
    Start,
    #[command(description = "Мои бронирования")]
    MyBookings,
    #[command(description = "Заезды сегодня (для администратора)")]
    Today,
    #[command(description = "Помощь")]
    Help,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BookingInfo {
    id: i64,
    apartment_title: String,
    city: String,
    check_in: String,
    check_out: String,
    total_price: f64,
    created_by: String,
    status: String,
}

#[derive(Clone)]
struct BotState {
    pool: sqlx::SqlitePool,
    webapp_url: String,
    admin_tg_id: i64,
}

/// Reminder sweep interval (seconds).
const REMINDER_INTERVAL_SECS: u64 = 3600;

const BOOKING_INFO_SELECT: &str =
    "SELECT b.id, a.title AS apartment_title, a.city, b.check_in, b.check_out,
            b.total_price, b.created_by, b.status
     FROM bookings b
     JOIN apartments a ON a.id = b.apartment_id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let bot_token = std::env::var("BOT_TOKEN").expect("BOT_TOKEN must be set");
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:arenda.db?mode=rwc".into());
    let webapp_url = std::env::var("WEBAPP_URL").expect("WEBAPP_URL must be set");
    let admin_tg_id: i64 = std::env::var("ADMIN_TG_ID")
        .expect("ADMIN_TG_ID must be set")
        .parse()
        .expect("ADMIN_TG_ID must be a number");

    let pool = SqlitePoolOptions::new()
        .max_connections(3)
        .connect(&database_url)
        .await?;

    let bot = Bot::new(&bot_token);

    tracing::info!("Arenda bot starting...");

    // Spawn check-in reminder task
    let reminder_bot = bot.clone();
    let reminder_pool = pool.clone();
    tokio::spawn(async move {
        send_checkin_reminders(reminder_bot, reminder_pool).await;
    });

    let state = BotState {
        pool,
        webapp_url,
        admin_tg_id,
    };

    let cmd_handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint({
            let state = state.clone();
            move |bot: Bot, msg: Message, cmd: Command| {
                let state = state.clone();
                async move {
                    handle_command(bot, msg, cmd, &state).await?;
                    Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                }
            }
        });

    Dispatcher::builder(bot, dptree::entry().branch(cmd_handler))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

// ── Command handlers ──

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: &BotState,
) -> anyhow::Result<()> {
    match cmd {
        Command::Start => {
            bot.send_message(
                msg.chat.id,
                "🏠 <b>Аренда квартир</b>\n\n\
                 Привет! Здесь можно выбрать квартиру,\n\
                 забронировать даты и оплатить картой.\n\n\
                 Жми кнопку ниже 👇",
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(webapp_keyboard(state))
            .await?;
        }

        Command::MyBookings => {
            let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);

            let query = format!(
                "{} WHERE b.created_by = ? AND b.status IN ('pending', 'confirmed')
                 AND b.check_in >= date('now')
                 ORDER BY b.check_in ASC",
                BOOKING_INFO_SELECT
            );
            let bookings = sqlx::query_as::<_, BookingInfo>(&query)
                .bind(user_id.to_string())
                .fetch_all(&state.pool)
                .await?;

            if bookings.is_empty() {
                bot.send_message(msg.chat.id, "У вас пока нет активных бронирований 🤷")
                    .reply_markup(webapp_keyboard(state))
                    .await?;
            } else {
                let mut text = "📋 <b>Ваши бронирования:</b>\n\n".to_string();
                for b in &bookings {
                    text.push_str(&format!(
                        "🏠 <b>{}</b> ({})\n📅 {} — {}\n💰 {} ₽ · {}\n\n",
                        b.apartment_title,
                        b.city,
                        b.check_in,
                        b.check_out,
                        b.total_price,
                        status_ru(&b.status),
                    ));
                }
                bot.send_message(msg.chat.id, text)
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
        }

        Command::Today => {
            let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);
            if user_id != state.admin_tg_id {
                bot.send_message(msg.chat.id, "Команда доступна только администратору")
                    .await?;
                return Ok(());
            }

            let query = format!(
                "{} WHERE b.status = 'confirmed' AND b.check_in = date('now')
                 ORDER BY b.id ASC",
                BOOKING_INFO_SELECT
            );
            let bookings = sqlx::query_as::<_, BookingInfo>(&query)
                .fetch_all(&state.pool)
                .await?;

            if bookings.is_empty() {
                bot.send_message(msg.chat.id, "Сегодня заездов нет").await?;
            } else {
                let mut text = "🔑 <b>Заезды сегодня:</b>\n\n".to_string();
                for b in &bookings {
                    text.push_str(&format!(
                        "№{} · {} ({})\n👤 {} · до {}\n\n",
                        b.id, b.apartment_title, b.city, b.created_by, b.check_out,
                    ));
                }
                bot.send_message(msg.chat.id, text)
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
        }

        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
    }

    Ok(())
}

fn webapp_keyboard(state: &BotState) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::web_app(
        "🏠 Снять квартиру",
        WebAppInfo {
            url: state.webapp_url.parse().expect("Invalid WEBAPP_URL"),
        },
    )]])
}

fn status_ru(status: &str) -> &'static str {
    match status {
        "pending" => "ожидает подтверждения",
        "confirmed" => "подтверждено",
        "cancelled" => "отменено",
        "completed" => "завершено",
        _ => "?",
    }
}

// ── Check-in reminders ──

/// Once an hour: guests with a confirmed booking checking in tomorrow get
/// one reminder. `reminder_sent` keeps redelivery out.
async fn send_checkin_reminders(bot: Bot, pool: sqlx::SqlitePool) {
    let mut tick = interval(Duration::from_secs(REMINDER_INTERVAL_SECS));
    loop {
        tick.tick().await;

        let query = format!(
            "{} WHERE b.status = 'confirmed' AND b.reminder_sent = 0
             AND b.check_in = date('now', '+1 day')",
            BOOKING_INFO_SELECT
        );
        let due = match sqlx::query_as::<_, BookingInfo>(&query)
            .fetch_all(&pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("reminder query failed: {}", e);
                continue;
            }
        };

        for b in due {
            // only guests who came through the Mini-App have a numeric id
            let Ok(chat_id) = b.created_by.parse::<i64>() else {
                continue;
            };

            let text = format!(
                "🔔 Напоминание: завтра заезд!\n\n🏠 {}\n📅 {} — {}\nХорошей поездки!",
                b.apartment_title, b.check_in, b.check_out,
            );
            if let Err(e) = bot.send_message(ChatId(chat_id), text).await {
                tracing::warn!("reminder for booking {} not delivered: {}", b.id, e);
                continue;
            }

            if let Err(e) = sqlx::query("UPDATE bookings SET reminder_sent = 1 WHERE id = ?")
                .bind(b.id)
                .execute(&pool)
                .await
            {
                tracing::error!("failed to mark reminder for booking {}: {}", b.id, e);
            }
        }
    }
}
