use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::availability;
use crate::error::AppError;
use crate::lifecycle::{self, CreateBookingInput};
use crate::models::*;
use crate::store::LedgerStore;
use crate::AppState;

/// POST /api/bookings — create a booking in `pending` state.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Booking>>), AppError> {
    let (Some(apartment_id), Some(check_in), Some(check_out), Some(created_by)) = (
        body.apartment_id,
        body.check_in.as_deref(),
        body.check_out.as_deref(),
        body.created_by.as_deref(),
    ) else {
        return Err(AppError::Validation(
            "Необходимо указать apartment_id, check_in, check_out и created_by".into(),
        ));
    };

    let booking = lifecycle::create_booking(
        &state.store,
        CreateBookingInput {
            apartment_id,
            created_by,
            check_in,
            check_out,
            guests: body.guests.unwrap_or(1),
            special_requests: body.special_requests,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(booking))))
}

/// GET /api/bookings?apartment_id=&created_by=
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<ApiResponse<Vec<Booking>>>, AppError> {
    let bookings = state
        .store
        .list_bookings(query.apartment_id, query.created_by.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Booking>>, AppError> {
    let booking = state
        .store
        .find_booking(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Бронирование не найдено".into()))?;
    Ok(Json(ApiResponse::success(booking)))
}

/// PUT /api/bookings/:id — status transition requested by `actor`.
pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<ApiResponse<Booking>>, AppError> {
    let booking =
        lifecycle::transition(&state.store, id, body.status, &body.actor, &state.admin_id).await?;
    Ok(Json(ApiResponse::success(booking)))
}

/// GET /api/availability?apartment_id=&check_in=&check_out= — calendar
/// hint for the booking form. Unknown apartments read as unavailable.
pub async fn check_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ApiResponse<AvailabilityResponse>>, AppError> {
    let (check_in, check_out) = availability::validate_range(&query.check_in, &query.check_out)?;

    if state.store.find_apartment(query.apartment_id).await?.is_none() {
        return Ok(Json(ApiResponse::success(AvailabilityResponse {
            available: false,
        })));
    }

    let blocking = state.store.blocking_bookings(query.apartment_id).await?;
    let available = availability::is_range_available(check_in, check_out, &blocking);
    Ok(Json(ApiResponse::success(AvailabilityResponse { available })))
}
