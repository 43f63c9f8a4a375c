//! Outbound email through an HTTP mail relay.
//!
//! Delivery failures never propagate into booking flows: call sites either
//! go through [`send_detached`] or log the returned [`DeliveryFailure`] and
//! carry on. An unconfigured relay degrades to a logged no-op so local
//! development works without credentials.

use sqlx::SqlitePool;
use thiserror::Error;

/// Reported when the relay rejects or never receives a message.
#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct DeliveryFailure(String);

/// Client for the transactional mail relay.
#[derive(Debug, Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_url: String,
    api_token: String,
    from: String,
}

impl Mailer {
    pub fn new(api_url: String, api_token: String, from: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_token,
            from,
        }
    }

    /// False when no relay URL is configured.
    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty()
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryFailure> {
        if !self.is_configured() {
            tracing::warn!("mail relay not configured, dropping '{}' to {}", subject, to);
            return Ok(());
        }

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|e| DeliveryFailure(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(DeliveryFailure(format!("relay answered {status}: {text}")));
        }
        Ok(())
    }
}

/// Fire-and-forget send; failures are logged, never returned, and a slow
/// relay cannot hold up the response that triggered the mail.
pub fn send_detached(mailer: Mailer, to: String, subject: String, body: String) {
    tokio::spawn(async move {
        if let Err(e) = mailer.send(&to, &subject, &body).await {
            tracing::error!("{}", e);
        }
    });
}

/// Mail a reminder for every confirmed booking on `today` that has not been
/// reminded yet, marking each one. Runs from the background interval task.
pub async fn send_due_reminders(db: &SqlitePool, mailer: &Mailer, today: &str) {
    #[derive(sqlx::FromRow)]
    struct DueReminder {
        id: i64,
        booking_time: String,
        email: String,
        username: String,
        service_name: String,
    }

    let due: Vec<DueReminder> = match sqlx::query_as(
        "SELECT b.id, b.booking_time, u.email, u.username, s.name AS service_name
         FROM bookings b
         JOIN users u ON u.id = b.user_id
         JOIN services s ON s.id = b.service_id
         WHERE b.booking_date = ? AND b.status = 'confirmed' AND b.reminder_sent = 0",
    )
    .bind(today)
    .fetch_all(db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("reminder query failed: {}", e);
            return;
        }
    };

    for booking in due {
        let body = format!(
            "Hello, {}!\n\n\
             This is a reminder that you have an appointment for {} today at {}.\n\
             Please be on time!",
            booking.username, booking.service_name, booking.booking_time
        );
        if let Err(e) = mailer.send(&booking.email, "Booking Reminder", &body).await {
            tracing::error!("reminder for booking {}: {}", booking.id, e);
            continue;
        }
        if let Err(e) = sqlx::query("UPDATE bookings SET reminder_sent = 1 WHERE id = ?")
            .bind(booking.id)
            .execute(db)
            .await
        {
            tracing::error!("failed to mark reminder for booking {}: {}", booking.id, e);
        }
    }
}
