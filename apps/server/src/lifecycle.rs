//! Booking lifecycle: creation with an atomic availability guard, and
//! actor-checked status transitions.
//!
//! Allowed transitions: pending → confirmed, pending → cancelled,
//! confirmed → cancelled, confirmed → completed. Cancelled and completed
//! are terminal. A completed payment also moves a booking to completed;
//! that path lives in `reconcile`.

use chrono::Utc;

use crate::availability;
use crate::error::AppError;
use crate::models::{Booking, BookingStatus};
use crate::store::{LedgerStore, NewBooking};

pub struct CreateBookingInput<'a> {
    pub apartment_id: i64,
    pub created_by: &'a str,
    pub check_in: &'a str,
    pub check_out: &'a str,
    pub guests: i64,
    pub special_requests: Option<String>,
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
    )
}

/// Creates a booking in `pending` state.
///
/// The date range is validated here; the conflict check happens inside the
/// store's guarded insert, so two concurrent requests for overlapping
/// ranges cannot both win.
pub async fn create_booking(
    store: &dyn LedgerStore,
    input: CreateBookingInput<'_>,
) -> Result<Booking, AppError> {
    let (check_in, check_out) = availability::validate_range(input.check_in, input.check_out)?;

    let apartment = store
        .find_apartment(input.apartment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Квартира не найдена".into()))?;

    if input.guests < 1 {
        return Err(AppError::Validation("Укажите количество гостей".into()));
    }
    if input.guests > apartment.max_guests {
        return Err(AppError::Validation(format!(
            "Слишком много гостей: максимум {}",
            apartment.max_guests
        )));
    }

    // Price is always recomputed server-side.
    let total_price = availability::nights(check_in, check_out) as f64 * apartment.price_per_night;

    let new = NewBooking {
        apartment_id: apartment.id,
        created_by: input.created_by.to_string(),
        check_in,
        check_out,
        guests: input.guests,
        total_price,
        special_requests: input.special_requests,
    };

    store
        .insert_booking_if_free(&new)
        .await?
        .ok_or_else(|| AppError::Conflict("Выбранные даты уже заняты".into()))
}

/// Applies a status transition requested by `actor`.
///
/// Who may do what: confirm — apartment owner or admin; cancel — the guest
/// who created the booking, the owner, or admin; complete — owner or admin.
pub async fn transition(
    store: &dyn LedgerStore,
    booking_id: i64,
    to: BookingStatus,
    actor: &str,
    admin_id: &str,
) -> Result<Booking, AppError> {
    let booking = store
        .find_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Бронирование не найдено".into()))?;

    if !can_transition(booking.status, to) {
        return Err(AppError::InvalidState(format!(
            "Нельзя перевести бронирование из статуса '{}' в '{}'",
            booking.status.as_str(),
            to.as_str()
        )));
    }

    let is_admin = !admin_id.is_empty() && actor == admin_id;
    let is_owner = match store.find_apartment(booking.apartment_id).await? {
        Some(apartment) => apartment.owner_id == actor,
        None => false,
    };
    let is_guest = booking.created_by == actor;

    let allowed = match to {
        BookingStatus::Confirmed | BookingStatus::Completed => is_owner || is_admin,
        BookingStatus::Cancelled => is_guest || is_owner || is_admin,
        BookingStatus::Pending => false,
    };
    if !allowed {
        return Err(AppError::Forbidden("Недостаточно прав для этой операции".into()));
    }

    // Guarded update: if a concurrent request already moved the booking,
    // this one loses and reports the stale state.
    let applied = store
        .set_booking_status(booking_id, &[booking.status], to)
        .await?;
    if !applied {
        return Err(AppError::InvalidState(
            "Статус бронирования уже изменился, обновите данные".into(),
        ));
    }

    store
        .find_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Бронирование не найдено".into()))
}

/// Cancels pending bookings that sat unconfirmed longer than `ttl_hours`,
/// releasing their date ranges. Called from a background interval task.
pub async fn expire_stale_pending(store: &dyn LedgerStore, ttl_hours: i64) {
    if ttl_hours <= 0 {
        return;
    }
    let cutoff = (Utc::now() - chrono::Duration::hours(ttl_hours))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    match store.cancel_stale_pending(&cutoff).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("released {} stale pending bookings", n),
        Err(e) => tracing::error!("stale booking sweep failed: {}", e),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;
    use crate::store::NewApartment;

    const OWNER: &str = "owner@example.com";
    const GUEST: &str = "guest@example.com";
    const ADMIN: &str = "admin@example.com";

    async fn seed_apartment(store: &MemStore, price: f64, max_guests: i64) -> i64 {
        store
            .insert_apartment(&NewApartment {
                title: "Студия у метро".into(),
                address: "ул. Ленина, 1".into(),
                city: "Москва".into(),
                price_per_night: price,
                max_guests,
                amenities: "[\"wifi\"]".into(),
                owner_id: OWNER.into(),
            })
            .await
            .unwrap()
            .id
    }

    fn booking_input<'a>(apartment_id: i64, check_in: &'a str, check_out: &'a str) -> CreateBookingInput<'a> {
        CreateBookingInput {
            apartment_id,
            created_by: GUEST,
            check_in,
            check_out,
            guests: 2,
            special_requests: None,
        }
    }

    // ── create_booking ──

    #[tokio::test]
    async fn test_create_computes_total_price() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;

        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();

        assert_eq!(booking.total_price, 3000.0);
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_unknown_apartment() {
        let store = MemStore::new();
        let err = create_booking(&store, booking_input(99, "2024-06-01", "2024-06-04"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_zero_nights_rejected() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let err = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_too_many_guests() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 2).await;
        let input = CreateBookingInput {
            guests: 5,
            ..booking_input(apt, "2024-06-01", "2024-06-04")
        };
        let err = create_booking(&store, input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_overlapping_booking_conflicts() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-05"))
            .await
            .unwrap();

        let err = create_booking(&store, booking_input(apt, "2024-06-03", "2024-06-07"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_back_to_back_bookings_succeed() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        create_booking(&store, booking_input(apt, "2024-01-01", "2024-01-05"))
            .await
            .unwrap();
        create_booking(&store, booking_input(apt, "2024-01-05", "2024-01-10"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_apartment_does_not_conflict() {
        let store = MemStore::new();
        let apt_a = seed_apartment(&store, 1000.0, 4).await;
        let apt_b = seed_apartment(&store, 2000.0, 4).await;
        create_booking(&store, booking_input(apt_a, "2024-06-01", "2024-06-05"))
            .await
            .unwrap();
        create_booking(&store, booking_input(apt_b, "2024-06-01", "2024-06-05"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelling_frees_the_range() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-05"))
            .await
            .unwrap();

        transition(&store, booking.id, BookingStatus::Cancelled, GUEST, "")
            .await
            .unwrap();

        // same exact range now succeeds
        create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-05"))
            .await
            .unwrap();
    }

    // ── transition ──

    #[tokio::test]
    async fn test_owner_confirms_pending() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();

        let confirmed = transition(&store, booking.id, BookingStatus::Confirmed, OWNER, "")
            .await
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_guest_cannot_confirm() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();

        let err = transition(&store, booking.id, BookingStatus::Confirmed, GUEST, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_admin_confirms_pending() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();

        transition(&store, booking.id, BookingStatus::Confirmed, ADMIN, ADMIN)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_guest_cancels_own_booking() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();

        let cancelled = transition(&store, booking.id, BookingStatus::Cancelled, GUEST, "")
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn test_stranger_cannot_cancel() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();

        let err = transition(&store, booking.id, BookingStatus::Cancelled, "someone-else", "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_no_transition_out_of_cancelled() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();
        transition(&store, booking.id, BookingStatus::Cancelled, GUEST, "")
            .await
            .unwrap();

        let err = transition(&store, booking.id, BookingStatus::Confirmed, OWNER, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_pending_cannot_complete_directly() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();

        let err = transition(&store, booking.id, BookingStatus::Completed, OWNER, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_owner_completes_confirmed() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();
        transition(&store, booking.id, BookingStatus::Confirmed, OWNER, "")
            .await
            .unwrap();
        let done = transition(&store, booking.id, BookingStatus::Completed, OWNER, "")
            .await
            .unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_booking_not_found() {
        let store = MemStore::new();
        let err = transition(&store, 42, BookingStatus::Cancelled, GUEST, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    // ── expire_stale_pending ──

    #[tokio::test]
    async fn test_sweep_releases_only_stale_pending() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let stale = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();
        let confirmed = create_booking(&store, booking_input(apt, "2024-07-01", "2024-07-04"))
            .await
            .unwrap();
        transition(&store, confirmed.id, BookingStatus::Confirmed, OWNER, "")
            .await
            .unwrap();
        store.backdate_booking(stale.id, "2020-01-01 00:00:00");
        store.backdate_booking(confirmed.id, "2020-01-01 00:00:00");

        expire_stale_pending(&store, 48).await;

        let stale = store.find_booking(stale.id).await.unwrap().unwrap();
        let confirmed = store.find_booking(confirmed.id).await.unwrap().unwrap();
        assert_eq!(stale.status, BookingStatus::Cancelled);
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_sweep_disabled_with_zero_ttl() {
        let store = MemStore::new();
        let apt = seed_apartment(&store, 1000.0, 4).await;
        let booking = create_booking(&store, booking_input(apt, "2024-06-01", "2024-06-04"))
            .await
            .unwrap();
        store.backdate_booking(booking.id, "2020-01-01 00:00:00");

        expire_stale_pending(&store, 0).await;

        let booking = store.find_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
    }
}
