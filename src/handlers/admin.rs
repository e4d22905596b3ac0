use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::auth::check_admin;
use super::bookings::parse_status;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Actor, Booking, BookingStatus};
use crate::services::lifecycle::{self, TransitionExtra};
use crate::state::AppState;

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_admin(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let status_filter = query.status.as_deref().map(parse_status).transpose()?;

    let db = state.db()?;
    Ok(Json(queries::get_all_bookings(&db, status_filter, limit)?))
}

// POST /api/admin/bookings/:id/cancel
#[derive(Deserialize)]
pub struct CancelRequest {
    pub note: Option<String>,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Booking>, AppError> {
    check_admin(&headers, &state.config.admin_token)?;

    let note = body.and_then(|Json(b)| b.note);
    let booking = {
        let mut db = state.db()?;
        lifecycle::transition(
            &mut db,
            &id,
            BookingStatus::Cancelled,
            &Actor::admin("admin"),
            TransitionExtra {
                note: Some(note.unwrap_or_else(|| "Booking cancelled by admin".to_string())),
                ..Default::default()
            },
        )?
    };

    tracing::info!(booking_id = %id, "booking cancelled by admin");
    Ok(Json(booking))
}
