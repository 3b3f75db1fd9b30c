use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::*;
use crate::store::{ApartmentPatch, LedgerStore, NewApartment};
use crate::AppState;

fn is_admin(state: &AppState, actor: &str) -> bool {
    !state.admin_id.is_empty() && actor == state.admin_id
}

/// GET /api/apartments — listing with optional city/owner filters.
pub async fn list_apartments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApartmentsQuery>,
) -> Result<Json<ApiResponse<Vec<Apartment>>>, AppError> {
    let apartments = state
        .store
        .list_apartments(query.city.as_deref(), query.owner.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(apartments)))
}

/// GET /api/apartments/:id
pub async fn get_apartment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Apartment>>, AppError> {
    let apartment = state
        .store
        .find_apartment(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Квартира не найдена".into()))?;
    Ok(Json(ApiResponse::success(apartment)))
}

/// POST /api/apartments
pub async fn create_apartment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateApartmentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Apartment>>), AppError> {
    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Укажите название".into()));
    }
    if body.owner_id.trim().is_empty() {
        return Err(AppError::Validation("Укажите владельца".into()));
    }
    if body.price_per_night <= 0.0 {
        return Err(AppError::Validation("Цена за ночь должна быть больше нуля".into()));
    }

    let new = NewApartment {
        title: body.title,
        address: body.address,
        city: body.city,
        price_per_night: body.price_per_night,
        max_guests: body.max_guests.unwrap_or(2).max(1),
        amenities: serde_json::to_string(&body.amenities).unwrap_or_else(|_| "[]".into()),
        owner_id: body.owner_id,
    };

    let apartment = state.store.insert_apartment(&new).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(apartment))))
}

/// PUT /api/apartments/:id — owner-only. Price and capacity freeze once
/// any booking references the apartment; descriptive fields stay editable.
pub async fn update_apartment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateApartmentRequest>,
) -> Result<Json<ApiResponse<Apartment>>, AppError> {
    let apartment = state
        .store
        .find_apartment(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Квартира не найдена".into()))?;

    if apartment.owner_id != body.actor && !is_admin(&state, &body.actor) {
        return Err(AppError::Forbidden("Квартиру может изменять только владелец".into()));
    }

    let patch = ApartmentPatch {
        title: body.title,
        address: body.address,
        city: body.city,
        price_per_night: body.price_per_night,
        max_guests: body.max_guests,
        amenities: body
            .amenities
            .map(|a| serde_json::to_string(&a).unwrap_or_else(|_| "[]".into())),
    };

    if patch.touches_frozen_fields() {
        let referenced = state.store.list_bookings(Some(id), None).await?;
        if !referenced.is_empty() {
            return Err(AppError::Validation(
                "Нельзя менять цену или вместимость: по квартире уже есть бронирования".into(),
            ));
        }
    }

    let apartment = state
        .store
        .update_apartment(id, &patch)
        .await?
        .ok_or_else(|| AppError::NotFound("Квартира не найдена".into()))?;
    Ok(Json(ApiResponse::success(apartment)))
}

/// DELETE /api/apartments/:id — owner-only; refused while active
/// bookings hold dates.
pub async fn delete_apartment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let apartment = state
        .store
        .find_apartment(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Квартира не найдена".into()))?;

    if apartment.owner_id != query.actor && !is_admin(&state, &query.actor) {
        return Err(AppError::Forbidden("Квартиру может удалить только владелец".into()));
    }

    let blocking = state.store.blocking_bookings(id).await?;
    if !blocking.is_empty() {
        return Err(AppError::Conflict(
            "Нельзя удалить квартиру с активными бронированиями".into(),
        ));
    }

    state.store.delete_apartment(id).await?;
    Ok(Json(ApiResponse::success(())))
}
