//! Booking lifecycle: the status state machine and its transition rules.
//!
//! `pending` is the only initial state; `completed` and `canceled` are
//! terminal. The guard plans a transition without persisting anything, so a
//! rejected request leaves the stored status untouched by construction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::BookingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
        }
    }

    /// Parse the stored form.
    pub fn parse(s: &str) -> Result<Self, BookingError> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "canceled" => Ok(BookingStatus::Canceled),
            other => Err(BookingError::Validation(format!(
                "unknown booking status '{other}'"
            ))),
        }
    }

    /// Completed and canceled bookings accept no further changes.
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Canceled)
    }
}

/// A permitted status change, planned but not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Persist the new status; `request_review` asks the caller to send the
    /// review-request notification after committing.
    Apply { request_review: bool },
    /// Current and requested status already agree; persist nothing.
    NoOp,
}

/// Check a requested status change against the lifecycle rules.
///
/// Pure: `today` is supplied by the caller.
pub fn plan_transition(
    current: BookingStatus,
    requested: BookingStatus,
    booking_date: NaiveDate,
    today: NaiveDate,
) -> Result<Transition, BookingError> {
    use BookingStatus::*;

    match (current, requested) {
        (Completed, _) => Err(BookingError::IllegalTransition(
            "booking is completed and can no longer be changed".into(),
        )),
        (Canceled, Canceled) => Ok(Transition::NoOp),
        (Canceled, _) => Err(BookingError::IllegalTransition(
            "booking is canceled and can no longer be changed".into(),
        )),
        (Pending, Pending) | (Confirmed, Confirmed) => Ok(Transition::NoOp),
        (Pending, Confirmed) => {
            if booking_date < today {
                Err(BookingError::IllegalTransition(
                    "cannot confirm a booking with a past date".into(),
                ))
            } else {
                Ok(Transition::Apply {
                    request_review: false,
                })
            }
        }
        (Pending, Completed) => Err(BookingError::IllegalTransition(
            "booking must be confirmed before completing".into(),
        )),
        (Pending, Canceled) | (Confirmed, Canceled) => Ok(Transition::Apply {
            request_review: false,
        }),
        (Confirmed, Completed) => Ok(Transition::Apply {
            request_review: true,
        }),
        (Confirmed, Pending) => Err(BookingError::IllegalTransition(
            "cannot return a confirmed booking to pending".into(),
        )),
    }
}

// ── Tests ──
