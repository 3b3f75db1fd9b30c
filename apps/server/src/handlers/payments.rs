use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::*;
use crate::provider;
use crate::reconcile::{self, EventOutcome};
use crate::store::LedgerStore;
use crate::AppState;

/// Header carrying the provider's webhook signature.
const SIGNATURE_HEADER: &str = "x-signature";

/// POST /api/payments/create-payment-intent
///
/// Opens a provider intent and returns the client confirmation secret.
/// The charge amount is recomputed server-side from the booking total
/// plus the service fee.
pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateIntentRequest>,
) -> Result<Json<ApiResponse<CreateIntentResponse>>, AppError> {
    let Some(booking_id) = body.booking_id else {
        return Err(AppError::Validation("Необходимо указать booking_id".into()));
    };

    let outcome = reconcile::create_intent(
        &state.store,
        &state.provider,
        booking_id,
        body.amount,
        body.paid_by.as_deref(),
        state.fee_percent,
        &state.currency,
    )
    .await?;

    Ok(Json(ApiResponse::success(CreateIntentResponse {
        intent_id: outcome.intent_id,
        client_secret: outcome.client_secret,
        amount: outcome.amount,
    })))
}

/// POST /api/payments — direct payment entry (cash/transfer, or the
/// client-side card confirmation fallback).
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Payment>>), AppError> {
    let (Some(booking_id), Some(amount), Some(method), Some(paid_by)) = (
        body.booking_id,
        body.amount,
        body.payment_method,
        body.paid_by.as_deref(),
    ) else {
        return Err(AppError::Validation(
            "Необходимо указать booking_id, amount, payment_method и paid_by".into(),
        ));
    };

    let payment = reconcile::record_payment(
        &state.store,
        booking_id,
        amount,
        method,
        body.status.unwrap_or(PaymentStatus::Pending),
        body.transaction_id,
        paid_by,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

/// GET /api/payments?booking_id=&status=&paid_by=
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PaymentsQuery>,
) -> Result<Json<ApiResponse<Vec<Payment>>>, AppError> {
    let payments = state
        .store
        .list_payments(query.booking_id, query.status, query.paid_by.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(payments)))
}

/// GET /api/payments/:id
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Payment>>, AppError> {
    let payment = state
        .store
        .find_payment(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Оплата не найдена".into()))?;
    Ok(Json(ApiResponse::success(payment)))
}

/// POST /api/payments/webhook — provider callback.
///
/// Signature is checked against the raw body before anything is parsed.
/// Every verified event is acknowledged with 200, including unknown
/// types; 400 means only a verification or parse failure.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Verification("Вебхук без подписи".into()))?;

    provider::verify_webhook_signature(&state.webhook_secret, &body, signature)?;

    let event: ProviderEvent = serde_json::from_slice(&body)
        .map_err(|_| AppError::Validation("Некорректное тело вебхука".into()))?;

    tracing::info!("provider webhook: event={}", event.event_type);

    let outcome = reconcile::handle_event(&state.store, &event).await?;

    if let EventOutcome::Completed { booking_id, amount } = outcome {
        notify_paid_booking(&state, booking_id, amount).await;
    }

    Ok(Json(serde_json::json!({ "received": true })))
}

/// Telegram message to the marketplace admin about a paid booking.
async fn notify_paid_booking(state: &AppState, booking_id: i64, amount: f64) {
    if state.bot_token.is_empty() || state.admin_chat_id == 0 {
        return;
    }

    let details = match state.store.find_booking(booking_id).await {
        Ok(Some(booking)) => {
            let title = state
                .store
                .find_apartment(booking.apartment_id)
                .await
                .ok()
                .flatten()
                .map(|a| a.title)
                .unwrap_or_else(|| "?".into());
            format!(
                "💳 Оплачено бронирование №{}\n\n🏠 {}\n📅 {} — {}\n👤 {}\n💰 {} ₽",
                booking_id, title, booking.check_in, booking.check_out, booking.created_by, amount
            )
        }
        _ => format!("💳 Оплачено бронирование №{} на {} ₽", booking_id, amount),
    };

    send_telegram(&state.bot_token, state.admin_chat_id, &details).await;
}

/// Fire-and-forget sendMessage to the Telegram Bot API.
async fn send_telegram(bot_token: &str, chat_id: i64, text: &str) {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);
    let client = reqwest::Client::new();
    let _ = client
        .post(&url)
        .json(&serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        }))
        .send()
        .await;
}
