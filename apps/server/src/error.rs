use axum::{http::StatusCode, Json};
use thiserror::Error;

use crate::models::ApiResponse;

/// The error half of every handler result.
pub type Rejection = (StatusCode, Json<ApiResponse<()>>);

/// Typed failures of the booking domain.
///
/// Infrastructure failures (sqlx, IO) are not represented here; handlers log
/// them and answer 500 via [`db_error`]. Mail delivery failures live in
/// [`crate::mailer::DeliveryFailure`] and never reach callers.
#[derive(Debug, Error, PartialEq)]
pub enum BookingError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    // Scheduling collisions and uniqueness violations (all answer 409).
    /// The requested interval overlaps an existing booking.
    #[error("time slot is already taken by booking {booking_id} ({start}-{end})")]
    Conflict {
        booking_id: i64,
        start: String,
        end: String,
    },
    /// Lost the race on the (master, date, time) unique index.
    #[error("this master is already booked at the selected time")]
    SlotTaken,
    /// A booking can carry at most one review.
    #[error("a review for this booking already exists")]
    ReviewExists,

    /// The requested status change violates the booking lifecycle.
    #[error("{0}")]
    IllegalTransition(String),

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl BookingError {
    pub fn status(&self) -> StatusCode {
        match self {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Conflict { .. }
            | BookingError::SlotTaken
            | BookingError::ReviewExists => StatusCode::CONFLICT,
            BookingError::IllegalTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// Turn a domain error into the handler error shape.
pub fn reject(err: BookingError) -> Rejection {
    (err.status(), Json(ApiResponse::error(err.to_string())))
}

/// Log an infrastructure error and answer 500.
pub fn db_error(context: &'static str, err: sqlx::Error) -> Rejection {
    tracing::error!("{}: {}", context, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("DB error")),
    )
}

// ── Tests ──
