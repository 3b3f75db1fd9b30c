//! Payment reconciliation: intent creation, the direct payment-entry path
//! (cash/transfer, or the client-side confirmation fallback), and webhook
//! event handling.
//!
//! Idempotency rests on the storage layer: the completed-payment
//! uniqueness index over the provider transaction id makes redelivered
//! webhooks and the webhook-vs-client race collapse to a single completed
//! payment per charge, no matter the arrival order.

use crate::error::AppError;
use crate::models::{BookingStatus, Payment, PaymentMethod, PaymentStatus, ProviderEvent};
use crate::provider::ProviderClient;
use crate::store::{LedgerStore, NewPayment, PaymentInsert};

/// Charge total in major units: booking total plus the service fee,
/// rounded to cents.
pub fn charge_amount(total_price: f64, fee_percent: f64) -> f64 {
    (total_price * (1.0 + fee_percent / 100.0) * 100.0).round() / 100.0
}

/// Major → minor units for the provider API.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn from_minor_units(amount: i64) -> f64 {
    amount as f64 / 100.0
}

#[derive(Debug)]
pub struct IntentOutcome {
    pub intent_id: String,
    pub client_secret: String,
    pub amount: f64,
}

/// What a webhook event did, for the handler's logging/notification.
#[derive(Debug)]
pub enum EventOutcome {
    /// New completed payment recorded, booking moved to completed.
    Completed { booking_id: i64, amount: f64 },
    /// Redelivery of an already-recorded charge; nothing changed.
    AlreadyRecorded,
    /// Failure recorded for observability; booking untouched.
    FailureRecorded { booking_id: i64 },
    /// Unknown event type or unmapped payload; acknowledged and skipped.
    Ignored,
}

/// Opens a payment intent with the provider. No local state changes —
/// the charge is not captured yet.
///
/// The amount is recomputed from the booking regardless of what the
/// client sent; the client-side figure is display-only.
pub async fn create_intent(
    store: &dyn LedgerStore,
    provider: &ProviderClient,
    booking_id: i64,
    client_amount: Option<f64>,
    paid_by: Option<&str>,
    fee_percent: f64,
    currency: &str,
) -> Result<IntentOutcome, AppError> {
    let booking = store
        .find_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Бронирование не найдено".into()))?;
    let paid_by = paid_by.unwrap_or(booking.created_by.as_str());

    let amount = charge_amount(booking.total_price, fee_percent);
    if let Some(sent) = client_amount {
        if (sent - amount).abs() > 0.005 {
            tracing::warn!(
                "client-sent amount {} differs from computed {} for booking {}",
                sent,
                amount,
                booking_id
            );
        }
    }

    let description = format!("Оплата бронирования №{}", booking_id);
    let intent = provider
        .create_payment_intent(to_minor_units(amount), currency, booking_id, paid_by, &description)
        .await?;

    Ok(IntentOutcome {
        intent_id: intent.id,
        client_secret: intent.client_secret,
        amount,
    })
}

/// Direct payment entry (cash, transfer, or the card fallback written by
/// the client after on-page confirmation). A completed payment also
/// completes the booking; repeating the same provider transaction is a
/// no-op that returns the already-recorded payment.
pub async fn record_payment(
    store: &dyn LedgerStore,
    booking_id: i64,
    amount: f64,
    method: PaymentMethod,
    status: PaymentStatus,
    transaction_id: Option<String>,
    paid_by: &str,
) -> Result<Payment, AppError> {
    let booking = store
        .find_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Бронирование не найдено".into()))?;

    if amount < booking.total_price - 0.005 {
        return Err(AppError::Validation(format!(
            "Сумма оплаты меньше стоимости бронирования ({})",
            booking.total_price
        )));
    }

    let new = NewPayment {
        booking_id,
        amount,
        payment_method: method,
        status,
        provider_txn_id: transaction_id,
        paid_by: paid_by.to_string(),
    };

    let payment = match store.insert_payment(&new).await? {
        PaymentInsert::Inserted(p) => p,
        PaymentInsert::DuplicateTxn => {
            let txn = new.provider_txn_id.as_deref().unwrap_or_default();
            tracing::info!("payment for txn {} already recorded", txn);
            return store
                .find_payment_by_txn(txn)
                .await?
                .ok_or_else(|| AppError::NotFound("Оплата не найдена".into()));
        }
    };

    if payment.status == PaymentStatus::Completed {
        complete_booking(store, booking_id).await?;
    }

    Ok(payment)
}

/// Applies a verified provider event. Callers must have checked the
/// webhook signature already; this function trusts the payload.
pub async fn handle_event(
    store: &dyn LedgerStore,
    event: &ProviderEvent,
) -> Result<EventOutcome, AppError> {
    match event.event_type.as_str() {
        "payment_intent.succeeded" => succeeded(store, event).await,
        "payment_intent.payment_failed" => failed(store, event).await,
        other => {
            tracing::info!("ignoring provider event: {}", other);
            Ok(EventOutcome::Ignored)
        }
    }
}

async fn succeeded(
    store: &dyn LedgerStore,
    event: &ProviderEvent,
) -> Result<EventOutcome, AppError> {
    let object = &event.data.object;
    let Some(booking_id) = object.booking_id() else {
        tracing::warn!("succeeded event {} has no booking_id in metadata", object.id);
        return Ok(EventOutcome::Ignored);
    };

    let Some(booking) = store.find_booking(booking_id).await? else {
        tracing::warn!("succeeded event {} references unknown booking {}", object.id, booking_id);
        return Ok(EventOutcome::Ignored);
    };

    let amount = if object.amount > 0 {
        from_minor_units(object.amount)
    } else {
        booking.total_price
    };
    let paid_by = object.paid_by().unwrap_or("provider").to_string();

    let new = NewPayment {
        booking_id,
        amount,
        payment_method: PaymentMethod::Card,
        status: PaymentStatus::Completed,
        provider_txn_id: Some(object.id.clone()),
        paid_by,
    };

    match store.insert_payment(&new).await? {
        PaymentInsert::Inserted(_) => {
            complete_booking(store, booking_id).await?;
            tracing::info!("payment {} reconciled, booking {} completed", object.id, booking_id);
            Ok(EventOutcome::Completed { booking_id, amount })
        }
        PaymentInsert::DuplicateTxn => {
            tracing::info!("duplicate delivery of payment {}", object.id);
            Ok(EventOutcome::AlreadyRecorded)
        }
    }
}

async fn failed(store: &dyn LedgerStore, event: &ProviderEvent) -> Result<EventOutcome, AppError> {
    let object = &event.data.object;
    let Some(booking_id) = object.booking_id() else {
        tracing::warn!("failed event {} has no booking_id in metadata", object.id);
        return Ok(EventOutcome::Ignored);
    };

    if store.find_booking(booking_id).await?.is_none() {
        tracing::warn!("failed event {} references unknown booking {}", object.id, booking_id);
        return Ok(EventOutcome::Ignored);
    }

    let new = NewPayment {
        booking_id,
        amount: from_minor_units(object.amount),
        payment_method: PaymentMethod::Card,
        status: PaymentStatus::Failed,
        provider_txn_id: Some(object.id.clone()),
        paid_by: object.paid_by().unwrap_or("provider").to_string(),
    };
    // failed rows are outside the uniqueness index; insert always lands
    store.insert_payment(&new).await?;

    tracing::warn!("payment {} failed for booking {}", object.id, booking_id);
    Ok(EventOutcome::FailureRecorded { booking_id })
}

/// Moves a booking to completed on successful payment. Guarded: terminal
/// statuses are never reopened, so duplicate events cannot re-complete.
async fn complete_booking(store: &dyn LedgerStore, booking_id: i64) -> Result<(), AppError> {
    let applied = store
        .set_booking_status(
            booking_id,
            &[BookingStatus::Pending, BookingStatus::Confirmed],
            BookingStatus::Completed,
        )
        .await?;
    if !applied {
        tracing::info!("booking {} already in a terminal state", booking_id);
    }
    Ok(())
}

// ── Tests ──
