//! Review submission: the tokenized email-link flow and the authenticated flow.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    error::{db_error, reject, BookingError, Rejection},
    lifecycle::BookingStatus,
    models::*,
    review_token, AppState,
};

use super::client;

/// Insert a review for a booking, taking reviewer, service and master from
/// the booking row. The unique booking_id constraint makes this single-use.
async fn insert_review(
    db: &SqlitePool,
    booking: &Booking,
    rating: i64,
    comment: &str,
) -> Result<Review, Rejection> {
    let id = sqlx::query(
        "INSERT INTO reviews (booking_id, user_id, service_id, master_id, rating, comment)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(booking.id)
    .bind(booking.user_id)
    .bind(booking.service_id)
    .bind(booking.master_id)
    .bind(rating)
    .bind(comment)
    .execute(db)
    .await
    .map_err(|e| {
        if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
            reject(BookingError::ReviewExists)
        } else {
            db_error("insert_review", e)
        }
    })?
    .last_insert_rowid();

    sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await
        .map_err(|e| db_error("insert_review SELECT", e))
}

/// Shared checks for both submission paths.
fn check_reviewable(booking: &Booking, rating: i64) -> Result<(), Rejection> {
    if !(1..=5).contains(&rating) {
        return Err(reject(BookingError::Validation(
            "rating must be between 1 and 5".into(),
        )));
    }
    let status = BookingStatus::parse(&booking.status).map_err(reject)?;
    if status != BookingStatus::Completed {
        return Err(reject(BookingError::Validation(
            "only completed bookings can be reviewed".into(),
        )));
    }
    Ok(())
}

/// GET /api/reviews/submit?token=&rating= — one-click rating from the
/// review-request email.
///
/// The signed token binds the request to a single booking; reviewer and
/// master come from that booking row, never from the query string.
pub async fn submit_review_link(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmitReviewQuery>,
) -> Result<Json<ApiResponse<&'static str>>, Rejection> {
    let booking_id = review_token::verify(&state.app_secret, &query.token, state.now_ts())
        .map_err(|e| reject(BookingError::Validation(e.to_string())))?;

    let booking = client::fetch_booking(&state.db, booking_id).await?;
    check_reviewable(&booking, query.rating)?;

    insert_review(&state.db, &booking, query.rating, "").await?;

    Ok(Json(ApiResponse::success("Thank you for your review!")))
}

/// POST /api/bookings/{id}/review — review by the booking's owner.
pub async fn add_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<CreateReviewRequest>,
) -> Result<Json<ApiResponse<Review>>, Rejection> {
    let user = client::extract_user(&headers, &state)?;

    let booking = sqlx::query_as::<_, Booking>(
        "SELECT * FROM bookings WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| db_error("add_review", e))?
    .ok_or_else(|| reject(BookingError::NotFound("booking")))?;

    check_reviewable(&booking, body.rating)?;

    let review = insert_review(
        &state.db,
        &booking,
        body.rating,
        body.comment.as_deref().unwrap_or(""),
    )
    .await?;

    Ok(Json(ApiResponse::success(review)))
}

// ── Tests ──
