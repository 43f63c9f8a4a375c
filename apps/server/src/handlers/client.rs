use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

use crate::{
    auth::{self, AuthUser},
    error::{db_error, reject, BookingError, Rejection},
    lifecycle::{self, BookingStatus, Transition},
    mailer,
    models::*,
    scheduling::{self, BookedSlot},
    AppState,
};

// ── Shared booking query (used by admin.rs too) ──

/// The shared SELECT for booking detail listings.
pub const BOOKING_DETAIL_SELECT: &str =
    "SELECT b.id, s.name AS service_name, s.price AS service_price,
            m.name AS master_name,
            b.booking_date, b.booking_time,
            strftime('%H:%M', b.booking_time, '+' || s.duration_min || ' minutes') AS end_time,
            b.status, u.username, b.created_at
     FROM bookings b
     JOIN services s ON s.id = b.service_id
     JOIN users u ON u.id = b.user_id
     LEFT JOIN masters m ON m.id = b.master_id";

// ── Shared helpers (pub(crate) for admin.rs / review.rs) ──

/// Extract the authenticated caller from the Authorization header.
pub(crate) fn extract_user(headers: &HeaderMap, state: &AppState) -> Result<AuthUser, Rejection> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Missing Authorization header")),
            )
        })?;
    auth::extract_user_from_header(header, &state.app_secret, state.now_ts()).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Invalid or expired session token")),
        )
    })
}

pub(crate) async fn fetch_user(db: &SqlitePool, id: i64) -> Result<User, Rejection> {
    sqlx::query_as::<_, User>(
        "SELECT id, username, email, phone_number, role, is_active FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(|e| db_error("fetch_user", e))?
    .ok_or_else(|| reject(BookingError::NotFound("user")))
}

pub(crate) async fn fetch_active_service(db: &SqlitePool, id: i64) -> Result<Service, Rejection> {
    sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_min, category, is_active, sort_order
         FROM services WHERE id = ? AND is_active = 1",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(|e| db_error("fetch_active_service", e))?
    .ok_or_else(|| reject(BookingError::NotFound("service")))
}

pub(crate) async fn fetch_master(db: &SqlitePool, id: i64) -> Result<Master, Rejection> {
    sqlx::query_as::<_, Master>(
        "SELECT id, name, role, email, service_id, salon_id FROM masters WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(|e| db_error("fetch_master", e))?
    .ok_or_else(|| reject(BookingError::NotFound("master")))
}

pub(crate) async fn fetch_booking(db: &SqlitePool, id: i64) -> Result<Booking, Rejection> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(|e| db_error("fetch_booking", e))?
        .ok_or_else(|| reject(BookingError::NotFound("booking")))
}

/// Occupied intervals for one master and date. Canceled bookings free their
/// interval; pending, confirmed and completed occupy it.
pub(crate) async fn load_booked_slots(
    db: &SqlitePool,
    master_id: i64,
    date: &str,
) -> Result<Vec<BookedSlot>, Rejection> {
    let rows: Vec<(i64, String, i64)> = sqlx::query_as(
        "SELECT b.id, b.booking_time, s.duration_min
         FROM bookings b
         JOIN services s ON s.id = b.service_id
         WHERE b.master_id = ? AND b.booking_date = ? AND b.status != 'canceled'",
    )
    .bind(master_id)
    .bind(date)
    .fetch_all(db)
    .await
    .map_err(|e| db_error("load_booked_slots", e))?;

    let mut slots = Vec::with_capacity(rows.len());
    for (id, time, duration_min) in rows {
        let start = NaiveTime::parse_from_str(&time, "%H:%M").map_err(|_| {
            tracing::error!("booking {} has malformed time '{}'", id, time);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("DB error")),
            )
        })?;
        slots.push(BookedSlot {
            booking_id: id,
            start,
            duration_min,
        });
    }
    Ok(slots)
}

fn parse_date(s: &str) -> Result<NaiveDate, Rejection> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
        reject(BookingError::Validation(
            "invalid date format, expected YYYY-MM-DD".into(),
        ))
    })
}

fn parse_time(s: &str) -> Result<NaiveTime, Rejection> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| {
        reject(BookingError::Validation(
            "invalid time format, expected HH:MM".into(),
        ))
    })
}

// ── Catalog endpoints ──

/// GET /api/services — active services, with the catalog filter form.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ServiceFilterQuery>,
) -> Result<Json<ApiResponse<Vec<Service>>>, Rejection> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, name, description, price, duration_min, category, is_active, sort_order
         FROM services WHERE is_active = 1",
    );
    if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
        qb.push(" AND category = ").push_bind(category);
    }
    if let Some(min) = filter.price_min {
        qb.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.price_max {
        qb.push(" AND price <= ").push_bind(max);
    }
    if let Some(min) = filter.duration_min {
        qb.push(" AND duration_min >= ").push_bind(min);
    }
    if let Some(max) = filter.duration_max {
        qb.push(" AND duration_min <= ").push_bind(max);
    }
    if let Some(q) = filter.query.as_deref().filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q);
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR description LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    // Sort column is whitelisted, never interpolated from input.
    let order = match filter.sort_by.as_deref() {
        Some("price") => "price ASC",
        Some("duration") => "duration_min ASC",
        Some("name") => "name ASC",
        _ => "sort_order ASC",
    };
    qb.push(" ORDER BY ").push(order);

    let services = qb
        .build_query_as::<Service>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| db_error("list_services", e))?;

    Ok(Json(ApiResponse::success(services)))
}

/// GET /api/services/{id} — one active service.
pub async fn service_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Service>>, Rejection> {
    let service = fetch_active_service(&state.db, id).await?;
    Ok(Json(ApiResponse::success(service)))
}

/// GET /api/masters?service_id=N — masters providing a service.
pub async fn list_masters(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MastersQuery>,
) -> Result<Json<ApiResponse<Vec<MasterSummary>>>, Rejection> {
    let masters = sqlx::query_as::<_, MasterSummary>(
        "SELECT id, name, role FROM masters WHERE service_id = ? ORDER BY name ASC",
    )
    .bind(query.service_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("list_masters", e))?;

    Ok(Json(ApiResponse::success(masters)))
}

/// GET /api/masters/top — top 5 masters by average review rating.
pub async fn top_masters(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<TopMaster>>>, Rejection> {
    let masters = sqlx::query_as::<_, TopMaster>(
        "SELECT m.id, m.name, AVG(r.rating) AS rating
         FROM masters m
         LEFT JOIN reviews r ON r.master_id = m.id
         GROUP BY m.id, m.name
         ORDER BY rating DESC
         LIMIT 5",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("top_masters", e))?;

    Ok(Json(ApiResponse::success(masters)))
}

// ── Slots ──

/// GET /api/slots?service_id=&master_id=&date= — bookable start times.
pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<ApiResponse<Vec<String>>>, Rejection> {
    parse_date(&query.date)?;

    let service = fetch_active_service(&state.db, query.service_id).await?;
    let master = fetch_master(&state.db, query.master_id).await?;
    if master.service_id != service.id {
        return Err(reject(BookingError::Validation(
            "master does not provide the requested service".into(),
        )));
    }

    let taken = load_booked_slots(&state.db, master.id, &query.date).await?;
    let slots: Vec<String> =
        scheduling::available_slots(&state.schedule, service.duration_min, &taken)
            .map(|t| t.format("%H:%M").to_string())
            .collect();

    Ok(Json(ApiResponse::success(slots)))
}

// ── Bookings ──

/// POST /api/bookings — create a booking in `pending` state.
///
/// The read-validate-insert sequence runs under the booking lock so two
/// concurrent requests for an overlapping slot cannot both pass validation;
/// the unique (master, date, time) index backstops exact-time duplicates.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> Result<Json<ApiResponse<BookingDetail>>, Rejection> {
    let user = extract_user(&headers, &state)?;

    let date = parse_date(&body.date)?;
    let time = parse_time(&body.time)?;
    // Normalized forms go to storage so string ordering stays consistent.
    let date_str = date.format("%Y-%m-%d").to_string();
    let time_str = time.format("%H:%M").to_string();

    let account = fetch_user(&state.db, user.id).await?;
    let service = fetch_active_service(&state.db, body.service_id).await?;
    let master = fetch_master(&state.db, body.master_id).await?;
    if master.service_id != service.id {
        return Err(reject(BookingError::Validation(
            "master does not provide the requested service".into(),
        )));
    }

    let booking_id = {
        let _guard = state.booking_lock.lock().await;

        let taken = load_booked_slots(&state.db, master.id, &date_str).await?;
        scheduling::validate_booking(date, time, service.duration_min, state.today(), &taken, None)
            .map_err(reject)?;

        let created_at = state.now_local().format("%Y-%m-%d %H:%M:%S").to_string();
        sqlx::query(
            "INSERT INTO bookings (user_id, service_id, master_id, booking_date, booking_time, status, created_at)
             VALUES (?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(user.id)
        .bind(service.id)
        .bind(master.id)
        .bind(&date_str)
        .bind(&time_str)
        .bind(&created_at)
        .execute(&state.db)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                reject(BookingError::SlotTaken)
            } else {
                db_error("create_booking INSERT", e)
            }
        })?
        .last_insert_rowid()
    };

    let detail = sqlx::query_as::<_, BookingDetail>(&format!(
        "{BOOKING_DETAIL_SELECT} WHERE b.id = ?"
    ))
    .bind(booking_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| db_error("create_booking SELECT", e))?;

    // Confirmation mail, detached after commit.
    let salon = match master.salon_id {
        Some(salon_id) => sqlx::query_as::<_, Salon>(
            "SELECT id, name, location, contact_email FROM salons WHERE id = ?",
        )
        .bind(salon_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| db_error("create_booking salon", e))?,
        None => None,
    };
    let salon_block = salon
        .map(|s| {
            format!(
                "\nSalon: {}\nAddress: {}\nContact: {}\n",
                s.name, s.location, s.contact_email
            )
        })
        .unwrap_or_default();
    let mail_body = format!(
        "Hello, {}!\n\n\
         You have successfully booked a service.\n\n\
         Date: {}\n\
         Time: {}\n\n\
         Master: {} ({})\n\
         Service: {}\n\
         Price: {}\n\
         {}\n\
         Thank you for using our service!",
        account.username, date_str, time_str, master.name, master.role, service.name,
        service.price, salon_block
    );
    mailer::send_detached(
        state.mailer.clone(),
        account.email,
        "Booking Confirmation".into(),
        mail_body,
    );

    Ok(Json(ApiResponse::success(detail)))
}

/// GET /api/bookings/my?status= — the caller's bookings, newest date first.
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<MyBookingsQuery>,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, Rejection> {
    let user = extract_user(&headers, &state)?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("{BOOKING_DETAIL_SELECT} WHERE b.user_id = "));
    qb.push_bind(user.id);
    if let Some(status) = query.status.as_deref() {
        let status = BookingStatus::parse(status).map_err(reject)?;
        qb.push(" AND b.status = ").push_bind(status.as_str());
    }
    qb.push(" ORDER BY b.booking_date DESC, b.booking_time DESC");

    let bookings = qb
        .build_query_as::<BookingDetail>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| db_error("my_bookings", e))?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// GET /api/bookings/{id} — full details incl. master and salon info.
/// Owner-of-booking or admin only.
pub async fn booking_details(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BookingFull>>, Rejection> {
    let user = extract_user(&headers, &state)?;

    let booking = sqlx::query_as::<_, BookingFull>(
        "SELECT b.id, b.user_id, b.booking_date, b.booking_time, b.status,
                s.name AS service_name, s.price AS service_price,
                m.name AS master_name, m.role AS master_role,
                sa.name AS salon_name, sa.location AS salon_location,
                sa.contact_email AS salon_contact
         FROM bookings b
         JOIN services s ON s.id = b.service_id
         LEFT JOIN masters m ON m.id = b.master_id
         LEFT JOIN salons sa ON sa.id = m.salon_id
         WHERE b.id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| db_error("booking_details", e))?
    .ok_or_else(|| reject(BookingError::NotFound("booking")))?;

    if booking.user_id != user.id && !auth::is_owner(&user) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Access denied")),
        ));
    }

    Ok(Json(ApiResponse::success(booking)))
}

/// DELETE /api/bookings/{id} — cancel the caller's booking.
///
/// Soft cancel: the row survives with status canceled and a canceled_at
/// stamp. The admin surface has a separate hard delete.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, Rejection> {
    let user = extract_user(&headers, &state)?;

    let booking = sqlx::query_as::<_, Booking>(
        "SELECT * FROM bookings WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| db_error("cancel_booking", e))?
    .ok_or_else(|| reject(BookingError::NotFound("booking")))?;

    let current = BookingStatus::parse(&booking.status).map_err(reject)?;
    let date = parse_date(&booking.booking_date)?;
    // Terminal bookings fall through to the guard for its precise message
    // (and the canceled -> canceled no-op).
    if !current.is_terminal() && date < state.today() {
        return Err(reject(BookingError::Validation(
            "cannot cancel a past booking".into(),
        )));
    }

    let transition =
        lifecycle::plan_transition(current, BookingStatus::Canceled, date, state.today())
            .map_err(reject)?;

    if let Transition::Apply { .. } = transition {
        let canceled_at = state.now_local().format("%Y-%m-%d %H:%M:%S").to_string();
        sqlx::query("UPDATE bookings SET status = 'canceled', canceled_at = ? WHERE id = ?")
            .bind(&canceled_at)
            .bind(id)
            .execute(&state.db)
            .await
            .map_err(|e| db_error("cancel_booking UPDATE", e))?;

        // Notify the client, detached.
        if let Ok(account) = fetch_user(&state.db, booking.user_id).await {
            let service_name: String =
                sqlx::query_scalar("SELECT name FROM services WHERE id = ?")
                    .bind(booking.service_id)
                    .fetch_optional(&state.db)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "?".into());
            let mail_body = format!(
                "Your booking for {} on {} at {} has been successfully canceled.",
                service_name, booking.booking_date, booking.booking_time
            );
            mailer::send_detached(
                state.mailer.clone(),
                account.email,
                "Booking Canceled".into(),
                mail_body,
            );
        }
    }

    Ok(Json(ApiResponse::success("Booking canceled")))
}

// ── Tests ──
