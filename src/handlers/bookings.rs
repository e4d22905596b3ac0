use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Actor, Booking, BookingDetail, BookingStatus, NewBooking, PaymentMethod};
use crate::services::lifecycle::{self, TransitionExtra};
use crate::services::payment::{self, PaymentRedirect, Reconciliation};
use crate::state::AppState;

pub(crate) fn parse_status(raw: &str) -> Result<BookingStatus, AppError> {
    BookingStatus::parse(raw.trim())
        .ok_or_else(|| AppError::Validation(format!("unknown booking status {raw:?}")))
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(body): Json<NewBooking>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    if body.vendor_id.trim().is_empty() || body.event_id.trim().is_empty() {
        return Err(AppError::Validation("vendorId and eventId are required".into()));
    }

    let booking = {
        let mut db = state.db()?;
        lifecycle::create_booking(&mut db, &actor, body)?
    };
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let db = state.db()?;
    Ok(Json(lifecycle::list_bookings(&db, &actor, status)?))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<BookingDetail>, AppError> {
    let db = state.db()?;
    Ok(Json(lifecycle::get_booking(&db, &actor, &id)?))
}

// PATCH /api/bookings/:id/status
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: String,
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
    pub note: Option<String>,
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Booking>, AppError> {
    let target = parse_status(&body.status)?;
    let extra = TransitionExtra {
        scheduled_date: body.scheduled_date,
        scheduled_time: body.scheduled_time,
        note: body.note,
    };

    let mut db = state.db()?;
    Ok(Json(lifecycle::transition(&mut db, &id, target, &actor, extra)?))
}

// POST /api/bookings/:id/confirm
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub payment_method: String,
    pub note: Option<String>,
}

pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Response, AppError> {
    let method = PaymentMethod::parse(body.payment_method.trim()).ok_or_else(|| {
        AppError::Validation(format!(
            "paymentMethod must be cash or online, got {:?}",
            body.payment_method
        ))
    })?;

    let mut db = state.db()?;
    let response = match method {
        PaymentMethod::Cash => {
            Json(lifecycle::confirm_cash(&mut db, &id, &actor, body.note)?).into_response()
        }
        PaymentMethod::Online => {
            Json(payment::initiate(&mut db, &state.config.esewa, &id, &actor)?).into_response()
        }
    };
    Ok(response)
}

// POST /api/bookings/:id/payment
pub async fn start_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<PaymentRedirect>, AppError> {
    let mut db = state.db()?;
    Ok(Json(payment::initiate(&mut db, &state.config.esewa, &id, &actor)?))
}

// POST /api/bookings/:id/payment/verify
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Reconciliation>, AppError> {
    Ok(Json(payment::reconcile(&state, &id, &actor).await?))
}
