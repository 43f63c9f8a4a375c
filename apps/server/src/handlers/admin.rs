use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;

use crate::{
    auth::{self, AuthUser},
    error::{db_error, reject, BookingError, Rejection},
    lifecycle::{self, BookingStatus, Transition},
    mailer, review_token,
    models::*,
    AppState,
};

use super::client::{self, BOOKING_DETAIL_SELECT};

/// Extract the caller and require the owner role.
fn extract_owner(headers: &HeaderMap, state: &AppState) -> Result<AuthUser, Rejection> {
    let user = client::extract_user(headers, state)?;
    if !auth::is_owner(&user) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Access denied")),
        ));
    }
    Ok(user)
}

// ── Bookings ──

/// GET /api/admin/bookings?status=&date= — filtered booking listing.
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminBookingsQuery>,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, Rejection> {
    extract_owner(&headers, &state)?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("{BOOKING_DETAIL_SELECT} WHERE 1 = 1"));
    if let Some(status) = query.status.as_deref() {
        let status = BookingStatus::parse(status).map_err(reject)?;
        qb.push(" AND b.status = ").push_bind(status.as_str());
    }
    if let Some(date) = query.date.as_deref().filter(|d| !d.is_empty()) {
        qb.push(" AND b.booking_date = ").push_bind(date);
    }
    qb.push(" ORDER BY b.booking_date ASC, b.booking_time ASC");

    let bookings = qb
        .build_query_as::<BookingDetail>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| db_error("list_bookings", e))?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// PUT /api/admin/bookings/{id}/status — drive the booking state machine.
///
/// A rejected transition leaves the stored status untouched; a no-op
/// (already in the requested state) succeeds without writing.
pub async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<&'static str>>, Rejection> {
    extract_owner(&headers, &state)?;

    let requested = BookingStatus::parse(&body.status).map_err(reject)?;
    let booking = client::fetch_booking(&state.db, id).await?;
    let current = BookingStatus::parse(&booking.status).map_err(reject)?;
    let date = chrono::NaiveDate::parse_from_str(&booking.booking_date, "%Y-%m-%d")
        .map_err(|_| {
            tracing::error!("booking {} has malformed date '{}'", id, booking.booking_date);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("DB error")),
            )
        })?;

    let transition =
        lifecycle::plan_transition(current, requested, date, state.today()).map_err(reject)?;

    if let Transition::Apply { request_review } = transition {
        if requested == BookingStatus::Canceled {
            let canceled_at = state.now_local().format("%Y-%m-%d %H:%M:%S").to_string();
            sqlx::query("UPDATE bookings SET status = 'canceled', canceled_at = ? WHERE id = ?")
                .bind(&canceled_at)
                .bind(id)
                .execute(&state.db)
                .await
                .map_err(|e| db_error("update_booking_status", e))?;
            notify_cancellation(&state, &booking).await;
        } else {
            sqlx::query("UPDATE bookings SET status = ? WHERE id = ?")
                .bind(requested.as_str())
                .bind(id)
                .execute(&state.db)
                .await
                .map_err(|e| db_error("update_booking_status", e))?;
        }

        if request_review {
            send_review_request(&state, &booking).await;
        }
    }

    Ok(Json(ApiResponse::success("Status updated")))
}

/// DELETE /api/admin/bookings/{id} — hard delete, notifying the client.
///
/// Counterpart of the client's soft cancel: the row (and its review, via
/// cascade) is gone afterwards.
pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, Rejection> {
    extract_owner(&headers, &state)?;

    let booking = client::fetch_booking(&state.db, id).await?;
    notify_cancellation(&state, &booking).await;

    sqlx::query("DELETE FROM bookings WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(|e| db_error("delete_booking", e))?;

    Ok(Json(ApiResponse::success("Booking deleted")))
}

/// Queue a cancellation email for the booking's client.
async fn notify_cancellation(state: &AppState, booking: &Booking) {
    let account = match client::fetch_user(&state.db, booking.user_id).await {
        Ok(account) => account,
        Err(_) => {
            tracing::error!("no client account for booking {}", booking.id);
            return;
        }
    };
    let mail_body = format!(
        "Your booking on {} at {} was canceled by the salon.\n\n\
         Please pick another time.",
        booking.booking_date, booking.booking_time
    );
    mailer::send_detached(
        state.mailer.clone(),
        account.email,
        "Booking Canceled".into(),
        mail_body,
    );
}

/// Email the client five one-click rating links for a completed booking.
async fn send_review_request(state: &AppState, booking: &Booking) {
    let account = match client::fetch_user(&state.db, booking.user_id).await {
        Ok(account) => account,
        Err(_) => {
            tracing::error!("no client account for booking {}", booking.id);
            return;
        }
    };

    let expires_at = chrono::Utc::now().timestamp() + review_token::TOKEN_TTL_SECS;
    let token = review_token::issue(&state.app_secret, booking.id, expires_at);
    let links: Vec<String> = (1..=5)
        .map(|stars| {
            format!(
                "{} - {}/api/reviews/submit?token={}&rating={}",
                stars, state.public_url, token, stars
            )
        })
        .collect();

    let mail_body = format!(
        "Hello, {}!\n\n\
         Your booking is completed. We value your feedback!\n\n\
         Rate our service and the work of the master by clicking the score you prefer:\n\n\
         {}\n\n\
         Thank you for your review!",
        account.username,
        links.join("\n")
    );
    mailer::send_detached(
        state.mailer.clone(),
        account.email,
        "Rate our service ⭐".into(),
        mail_body,
    );
}

// ── Services ──

/// GET /api/admin/services — ALL services, including inactive.
pub async fn list_all_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Service>>>, Rejection> {
    extract_owner(&headers, &state)?;

    let services = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_min, category, is_active, sort_order
         FROM services ORDER BY sort_order ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("list_all_services", e))?;

    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/admin/services — create a service.
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, Rejection> {
    extract_owner(&headers, &state)?;

    if body.duration_min <= 0 {
        return Err(reject(BookingError::Validation(
            "service duration must be positive".into(),
        )));
    }

    let id = sqlx::query(
        "INSERT INTO services (name, description, price, duration_min, category, sort_order)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&body.name)
    .bind(body.description.as_deref().unwrap_or(""))
    .bind(body.price)
    .bind(body.duration_min)
    .bind(body.category.as_deref().unwrap_or("hair"))
    .bind(body.sort_order.unwrap_or(0))
    .execute(&state.db)
    .await
    .map_err(|e| db_error("create_service", e))?
    .last_insert_rowid();

    let service = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_min, category, is_active, sort_order
         FROM services WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| db_error("create_service", e))?;

    Ok(Json(ApiResponse::success(service)))
}

/// PUT /api/admin/services/{id} — update a service; only supplied fields change.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, Rejection> {
    extract_owner(&headers, &state)?;

    if body.duration_min.is_some_and(|d| d <= 0) {
        return Err(reject(BookingError::Validation(
            "service duration must be positive".into(),
        )));
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE services SET ");
    let mut changed = false;
    {
        let mut assignments = qb.separated(", ");
        if let Some(name) = body.name.as_deref() {
            assignments.push("name = ").push_bind_unseparated(name);
            changed = true;
        }
        if let Some(description) = body.description.as_deref() {
            assignments
                .push("description = ")
                .push_bind_unseparated(description);
            changed = true;
        }
        if let Some(price) = body.price {
            assignments.push("price = ").push_bind_unseparated(price);
            changed = true;
        }
        if let Some(duration_min) = body.duration_min {
            assignments
                .push("duration_min = ")
                .push_bind_unseparated(duration_min);
            changed = true;
        }
        if let Some(category) = body.category.as_deref() {
            assignments
                .push("category = ")
                .push_bind_unseparated(category);
            changed = true;
        }
        if let Some(is_active) = body.is_active {
            assignments
                .push("is_active = ")
                .push_bind_unseparated(is_active);
            changed = true;
        }
        if let Some(sort_order) = body.sort_order {
            assignments
                .push("sort_order = ")
                .push_bind_unseparated(sort_order);
            changed = true;
        }
    }

    if changed {
        qb.push(" WHERE id = ").push_bind(id);
        qb.build()
            .execute(&state.db)
            .await
            .map_err(|e| db_error("update_service", e))?;
    }

    let service = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_min, category, is_active, sort_order
         FROM services WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| db_error("update_service", e))?
    .ok_or_else(|| reject(BookingError::NotFound("service")))?;

    Ok(Json(ApiResponse::success(service)))
}

// ── Masters ──

/// POST /api/admin/masters — add a master to a service.
pub async fn create_master(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateMasterRequest>,
) -> Result<Json<ApiResponse<Master>>, Rejection> {
    extract_owner(&headers, &state)?;

    client::fetch_active_service(&state.db, body.service_id).await?;
    if let Some(salon_id) = body.salon_id {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM salons WHERE id = ?")
            .bind(salon_id)
            .fetch_one(&state.db)
            .await
            .map_err(|e| db_error("create_master", e))?;
        if !exists {
            return Err(reject(BookingError::NotFound("salon")));
        }
    }

    let id = sqlx::query(
        "INSERT INTO masters (name, role, email, service_id, salon_id) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&body.name)
    .bind(body.role.as_deref().unwrap_or("Barber"))
    .bind(&body.email)
    .bind(body.service_id)
    .bind(body.salon_id)
    .execute(&state.db)
    .await
    .map_err(|e| {
        if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
            (
                StatusCode::CONFLICT,
                Json(ApiResponse::error("a master with this email already exists")),
            )
        } else {
            db_error("create_master", e)
        }
    })?
    .last_insert_rowid();

    let master = sqlx::query_as::<_, Master>(
        "SELECT id, name, role, email, service_id, salon_id FROM masters WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| db_error("create_master", e))?;

    Ok(Json(ApiResponse::success(master)))
}

// ── Reviews ──

/// GET /api/admin/reviews — all reviews, newest first.
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<ReviewDetail>>>, Rejection> {
    extract_owner(&headers, &state)?;

    let reviews = sqlx::query_as::<_, ReviewDetail>(
        "SELECT r.id, r.booking_id, u.username,
                m.name AS master_name, s.name AS service_name,
                r.rating, r.comment, r.created_at
         FROM reviews r
         JOIN users u ON u.id = r.user_id
         LEFT JOIN masters m ON m.id = r.master_id
         LEFT JOIN services s ON s.id = r.service_id
         ORDER BY r.created_at DESC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("list_reviews", e))?;

    Ok(Json(ApiResponse::success(reviews)))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::sign_session_token, db, mailer::Mailer, scheduling::ScheduleConfig};
    use axum::http::{header, HeaderValue};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Instant;

    const SECRET: &str = "test-secret";

    async fn test_state() -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO users (id, username, email, role) VALUES
                (1, 'alice', 'alice@test', 'user'),
                (2, 'boss', 'boss@test', 'owner')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO services (id, name, price, duration_min) VALUES (1, 'Haircut', 100, 60)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO masters (id, name, email, service_id) VALUES (1, 'Bob', 'bob@test', 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        Arc::new(AppState {
            db: pool,
            schedule: ScheduleConfig::default(),
            app_secret: SECRET.into(),
            mailer: Mailer::new(String::new(), String::new(), "noreply@test".into()),
            public_url: "http://localhost:3000".into(),
            utc_offset: chrono::FixedOffset::east_opt(0).unwrap(),
            started_at: Instant::now(),
            booking_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn headers_for(user_id: i64, role: &str) -> HeaderMap {
        let now = chrono::Utc::now().timestamp();
        let token = sign_session_token(SECRET, user_id, role, now + 3600);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    async fn insert_booking(state: &AppState, date: &str, time: &str, status: &str) -> i64 {
        sqlx::query(
            "INSERT INTO bookings (user_id, service_id, master_id, booking_date, booking_time, status, created_at)
             VALUES (1, 1, 1, ?, ?, ?, '2099-01-01 00:00:00')",
        )
        .bind(date)
        .bind(time)
        .bind(status)
        .execute(&state.db)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn stored_status(state: &AppState, id: i64) -> String {
        sqlx::query_scalar("SELECT status FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    fn tomorrow(state: &AppState) -> String {
        (state.today() + chrono::Days::new(1))
            .format("%Y-%m-%d")
            .to_string()
    }

    #[tokio::test]
    async fn test_non_owner_is_rejected() {
        let state = test_state().await;
        let err = list_bookings(
            State(state.clone()),
            headers_for(1, "user"),
            Query(AdminBookingsQuery {
                status: None,
                date: None,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_confirm_then_complete() {
        let state = test_state().await;
        let date = tomorrow(&state);
        let id = insert_booking(&state, &date, "10:00", "pending").await;

        update_booking_status(
            State(state.clone()),
            headers_for(2, "owner"),
            Path(id),
            Json(UpdateStatusRequest {
                status: "confirmed".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(stored_status(&state, id).await, "confirmed");

        update_booking_status(
            State(state.clone()),
            headers_for(2, "owner"),
            Path(id),
            Json(UpdateStatusRequest {
                status: "completed".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(stored_status(&state, id).await, "completed");
    }

    #[tokio::test]
    async fn test_confirm_past_booking_rejected_and_status_unchanged() {
        let state = test_state().await;
        let yesterday = (state.today() - chrono::Days::new(1))
            .format("%Y-%m-%d")
            .to_string();
        let id = insert_booking(&state, &yesterday, "10:00", "pending").await;

        let err = update_booking_status(
            State(state.clone()),
            headers_for(2, "owner"),
            Path(id),
            Json(UpdateStatusRequest {
                status: "confirmed".into(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(stored_status(&state, id).await, "pending");
    }

    #[tokio::test]
    async fn test_completed_booking_stays_completed() {
        let state = test_state().await;
        let date = tomorrow(&state);
        let id = insert_booking(&state, &date, "10:00", "completed").await;

        for requested in ["pending", "confirmed", "canceled"] {
            let err = update_booking_status(
                State(state.clone()),
                headers_for(2, "owner"),
                Path(id),
                Json(UpdateStatusRequest {
                    status: requested.into(),
                }),
            )
            .await
            .err()
            .unwrap();
            assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(stored_status(&state, id).await, "completed");
        }
    }

    #[tokio::test]
    async fn test_skip_confirmation_rejected() {
        let state = test_state().await;
        let date = tomorrow(&state);
        let id = insert_booking(&state, &date, "10:00", "pending").await;

        let err = update_booking_status(
            State(state.clone()),
            headers_for(2, "owner"),
            Path(id),
            Json(UpdateStatusRequest {
                status: "completed".into(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(stored_status(&state, id).await, "pending");
    }

    #[tokio::test]
    async fn test_unknown_status_rejected() {
        let state = test_state().await;
        let date = tomorrow(&state);
        let id = insert_booking(&state, &date, "10:00", "pending").await;

        let err = update_booking_status(
            State(state.clone()),
            headers_for(2, "owner"),
            Path(id),
            Json(UpdateStatusRequest {
                status: "expired".into(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_hard_delete_removes_row() {
        let state = test_state().await;
        let date = tomorrow(&state);
        let id = insert_booking(&state, &date, "10:00", "confirmed").await;

        delete_booking(State(state.clone()), headers_for(2, "owner"), Path(id))
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_update_service_partial() {
        let state = test_state().await;

        let updated = update_service(
            State(state.clone()),
            headers_for(2, "owner"),
            Path(1),
            Json(UpdateServiceRequest {
                name: None,
                description: None,
                price: Some(150),
                duration_min: None,
                category: None,
                is_active: None,
                sort_order: None,
            }),
        )
        .await
        .unwrap();

        let service = updated.0.data.unwrap();
        assert_eq!(service.price, 150);
        assert_eq!(service.name, "Haircut"); // untouched
        assert_eq!(service.duration_min, 60);
    }
}
