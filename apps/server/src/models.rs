use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub role: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub duration_min: i64,
    pub category: String,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Salon {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub contact_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Master {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub email: String,
    pub service_id: i64,
    pub salon_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub service_id: i64,
    pub master_id: Option<i64>,
    pub booking_date: String,
    pub booking_time: String,
    pub status: String,
    pub reminder_sent: bool,
    pub created_at: String,
    pub canceled_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: i64,
    pub booking_id: i64,
    pub user_id: i64,
    pub service_id: Option<i64>,
    pub master_id: Option<i64>,
    pub rating: i64,
    pub comment: String,
    pub created_at: String,
}

// ── API request/response types ──

/// Catalog filter form: every field optional, combined with AND.
#[derive(Debug, Deserialize)]
pub struct ServiceFilterQuery {
    pub category: Option<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub duration_min: Option<i64>,
    pub duration_max: Option<i64>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MastersQuery {
    pub service_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub service_id: i64,
    pub master_id: i64,
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: i64,
    pub master_id: i64,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct MyBookingsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminBookingsQuery {
    pub status: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub duration_min: i64,
    pub category: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub duration_min: Option<i64>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMasterRequest {
    pub name: String,
    pub role: Option<String>,
    pub email: String,
    pub service_id: i64,
    pub salon_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitReviewQuery {
    pub token: String,
    pub rating: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i64,
    pub comment: Option<String>,
}

/// Public master listing entry (no contact details).
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MasterSummary {
    pub id: i64,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TopMaster {
    pub id: i64,
    pub name: String,
    /// Average review rating; absent for masters without reviews.
    pub rating: Option<f64>,
}

/// Booking row joined with service, master and client names.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BookingDetail {
    pub id: i64,
    pub service_name: String,
    pub service_price: i64,
    pub master_name: Option<String>,
    pub booking_date: String,
    pub booking_time: String,
    pub end_time: String,
    pub status: String,
    pub username: String,
    pub created_at: String,
}

/// Full booking view for the detail endpoint, including salon info.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BookingFull {
    pub id: i64,
    pub user_id: i64,
    pub booking_date: String,
    pub booking_time: String,
    pub status: String,
    pub service_name: String,
    pub service_price: i64,
    pub master_name: Option<String>,
    pub master_role: Option<String>,
    pub salon_name: Option<String>,
    pub salon_location: Option<String>,
    pub salon_contact: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReviewDetail {
    pub id: i64,
    pub booking_id: i64,
    pub username: String,
    pub master_name: Option<String>,
    pub service_name: Option<String>,
    pub rating: i64,
    pub comment: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
