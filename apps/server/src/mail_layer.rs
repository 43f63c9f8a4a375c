//! Custom tracing layer that emails ERROR-level events to the salon owner.
//!
//! Features:
//! - Rate limiting: at most 1 message per `MIN_INTERVAL` (30 s default)
//! - Deduplication: identical error messages are suppressed for `DEDUP_WINDOW` (10 min)
//! - Non-blocking: relay calls are spawned onto the Tokio runtime

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::mailer::Mailer;

/// Minimum interval between error mails (prevents spam on cascading errors).
const MIN_INTERVAL: Duration = Duration::from_secs(30);
/// Window during which identical error hashes are suppressed.
const DEDUP_WINDOW: Duration = Duration::from_secs(600);

// ── Layer ──

/// A `tracing` layer that forwards ERROR events to `owner_email`.
pub struct MailLayer {
    mailer: Mailer,
    owner_email: String,
    state: Mutex<LayerState>,
}

struct LayerState {
    last_sent: Instant,
    /// Hash of recently mailed messages, with the time each was sent.
    recent: HashMap<u64, Instant>,
}

impl MailLayer {
    pub fn new(mailer: Mailer, owner_email: String) -> Self {
        Self {
            mailer,
            owner_email,
            state: Mutex::new(LayerState {
                last_sent: Instant::now() - MIN_INTERVAL, // allow first message immediately
                recent: HashMap::new(),
            }),
        }
    }

    /// Rate limit plus dedup in one pass over the shared state.
    fn should_send(&self, hash: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        state
            .recent
            .retain(|_, sent_at| now.duration_since(*sent_at) < DEDUP_WINDOW);

        if state.recent.contains_key(&hash) {
            return false;
        }
        if now.duration_since(state.last_sent) < MIN_INTERVAL {
            return false;
        }
        state.last_sent = now;
        state.recent.insert(hash, now);
        true
    }
}

impl<S: Subscriber> Layer<S> for MailLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };
        if !self.should_send(hash) {
            return;
        }

        let target = event.metadata().target();
        let file = event.metadata().file().unwrap_or("?");
        let line = event
            .metadata()
            .line()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".into());
        let body = format!(
            "A server error was logged:\n\n{message}\n\nat {target} ({file}:{line})"
        );

        let mailer = self.mailer.clone();
        let to = self.owner_email.clone();
        tokio::spawn(async move {
            // eprintln, not tracing: a tracing error here would re-enter this layer.
            if let Err(e) = mailer.send(&to, "Server error", &body).await {
                eprintln!("error mail failed: {e}");
            }
        });
    }
}

// ── Field visitor ──

/// Collects the `message` field plus any structured fields from an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if self.message.is_empty() {
            extras.join(", ")
        } else {
            format!("{} ({})", self.message, extras.join(", "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        if field.name() == "message" {
            self.message = val;
        } else {
            self.fields.push((field.name().to_string(), val));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn make_layer() -> MailLayer {
        MailLayer::new(
            Mailer::new(String::new(), String::new(), "noreply@test".into()),
            "owner@test".into(),
        )
    }

    #[test]
    fn test_first_message_allowed() {
        let layer = make_layer();
        assert!(layer.should_send(111));
    }

    #[test]
    fn test_rate_limit_suppresses_second() {
        let layer = make_layer();
        assert!(layer.should_send(111));
        // Different hash but within the rate limit window.
        assert!(!layer.should_send(222));
    }

    #[test]
    fn test_dedup_same_message() {
        let layer = make_layer();
        assert!(layer.should_send(111));

        // Fast-forward past the rate limit.
        layer.state.lock().unwrap().last_sent = Instant::now() - MIN_INTERVAL;

        assert!(!layer.should_send(111));
    }

    #[test]
    fn test_different_errors_sent_after_interval() {
        let layer = make_layer();
        assert!(layer.should_send(111));

        layer.state.lock().unwrap().last_sent = Instant::now() - MIN_INTERVAL;

        assert!(layer.should_send(222));
    }

    #[test]
    fn test_dedup_expires_after_window() {
        let layer = make_layer();
        assert!(layer.should_send(111));

        {
            let mut state = layer.state.lock().unwrap();
            state.last_sent = Instant::now() - MIN_INTERVAL;
            state.recent.clear();
            state
                .recent
                .insert(111, Instant::now() - DEDUP_WINDOW - Duration::from_secs(1));
        }

        assert!(layer.should_send(111));
    }

    #[test]
    fn test_format_message_basic() {
        let mut v = MessageVisitor::default();
        v.message = "Something failed".into();
        assert_eq!(v.message(), "Something failed");
    }

    #[test]
    fn test_format_message_with_fields() {
        let mut v = MessageVisitor::default();
        v.message = "DB error".into();
        v.fields.push(("booking_id".into(), "42".into()));
        assert_eq!(v.message(), "DB error (booking_id=42)");
    }

    #[test]
    fn test_format_message_fields_only() {
        let v = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(v.message(), "error=timeout");
    }
}
