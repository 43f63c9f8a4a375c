//! Slot calculation and booking conflict validation.
//!
//! All interval math happens in whole minutes since midnight over half-open
//! ranges `[start, end)`. Callers pre-filter occupied intervals to a single
//! master and date; nothing in this module touches the database or the clock.

use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::error::BookingError;

// ── Configuration ──

/// Working-day parameters for the slot calculator.
///
/// Loaded from the environment at startup (`OPEN_TIME`, `CLOSE_TIME`,
/// `SLOT_STEP_MIN`) and carried in application state.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Candidate stride in minutes.
    pub step_min: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            step_min: 30,
        }
    }
}

/// An occupied interval on a master's calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct BookedSlot {
    pub booking_id: i64,
    pub start: NaiveTime,
    pub duration_min: i64,
}

impl BookedSlot {
    fn start_min(&self) -> i64 {
        minute_of_day(self.start)
    }

    fn end_min(&self) -> i64 {
        self.start_min() + self.duration_min
    }
}

/// Minutes since midnight.
fn minute_of_day(t: NaiveTime) -> i64 {
    i64::from(t.num_seconds_from_midnight()) / 60
}

/// Render minutes since midnight as `HH:MM`.
fn format_minute(m: i64) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

fn time_of_minute(m: i64) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt((m / 60) as u32, (m % 60) as u32, 0)
}

// ── Overlap rule ──

/// Half-open interval overlap: `[s1,e1)` and `[s2,e2)` share an instant.
///
/// The single overlap rule for the whole crate. Slot listing, creation and
/// editing all go through here; there is deliberately no exact-start-time
/// shortcut anywhere.
pub fn intervals_overlap(s1: i64, e1: i64, s2: i64, e2: i64) -> bool {
    s1 < e2 && s2 < e1
}

// ── Slot Calculator ──

/// Lazy, ordered sequence of bookable start times.
///
/// Cheap to clone; cloning before the first `next()` lets the caller replay
/// the full sequence.
#[derive(Debug, Clone)]
pub struct SlotIter<'a> {
    cursor_min: i64,
    close_min: i64,
    step_min: i64,
    duration_min: i64,
    taken: &'a [BookedSlot],
}

impl Iterator for SlotIter<'_> {
    type Item = NaiveTime;

    fn next(&mut self) -> Option<NaiveTime> {
        if self.duration_min <= 0 || self.step_min <= 0 {
            return None;
        }
        while self.cursor_min + self.duration_min <= self.close_min {
            let start = self.cursor_min;
            self.cursor_min += self.step_min;
            let end = start + self.duration_min;
            let busy = self
                .taken
                .iter()
                .any(|b| intervals_overlap(start, end, b.start_min(), b.end_min()));
            if !busy {
                return time_of_minute(start);
            }
        }
        None
    }
}

/// All bookable start times for one master and date, ascending.
///
/// A candidate `t` is yielded when the service still fits the working window
/// (`t + duration <= close`) and `[t, t + duration)` misses every interval in
/// `taken`. A non-positive duration, or one longer than the window, yields an
/// empty sequence rather than an error.
pub fn available_slots<'a>(
    config: &ScheduleConfig,
    duration_min: i64,
    taken: &'a [BookedSlot],
) -> SlotIter<'a> {
    SlotIter {
        cursor_min: minute_of_day(config.open),
        close_min: minute_of_day(config.close),
        step_min: config.step_min,
        duration_min,
        taken,
    }
}

// ── Conflict Validator ──

/// Decide whether a proposed booking may be committed.
///
/// `existing` must already be limited to the same master and date. Editing an
/// existing booking passes its id as `exclude_booking_id` so it does not
/// collide with itself; the past-date rule applies to new bookings only.
pub fn validate_booking(
    date: NaiveDate,
    start: NaiveTime,
    duration_min: i64,
    today: NaiveDate,
    existing: &[BookedSlot],
    exclude_booking_id: Option<i64>,
) -> Result<(), BookingError> {
    if duration_min <= 0 {
        return Err(BookingError::Validation(
            "service duration must be positive".into(),
        ));
    }
    if exclude_booking_id.is_none() && date < today {
        return Err(BookingError::Validation(
            "cannot book a date in the past".into(),
        ));
    }

    let s = minute_of_day(start);
    let e = s + duration_min;
    for booked in existing {
        if Some(booked.booking_id) == exclude_booking_id {
            continue;
        }
        if intervals_overlap(s, e, booked.start_min(), booked.end_min()) {
            return Err(BookingError::Conflict {
                booking_id: booked.booking_id,
                start: format_minute(booked.start_min()),
                end: format_minute(booked.end_min()),
            });
        }
    }
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn booked(id: i64, start: NaiveTime, duration_min: i64) -> BookedSlot {
        BookedSlot {
            booking_id: id,
            start,
            duration_min,
        }
    }

    fn config() -> ScheduleConfig {
        ScheduleConfig::default()
    }

    // ── intervals_overlap ──

    #[test]
    fn test_overlap_partial() {
        assert!(intervals_overlap(600, 660, 630, 690)); // 10:00-11:00 vs 10:30-11:30
    }

    #[test]
    fn test_overlap_contained() {
        assert!(intervals_overlap(600, 720, 630, 660));
    }

    #[test]
    fn test_overlap_identical() {
        assert!(intervals_overlap(600, 660, 600, 660));
    }

    #[test]
    fn test_no_overlap_adjacent() {
        // Half-open: [10:00,11:00) and [11:00,12:00) touch but do not overlap.
        assert!(!intervals_overlap(600, 660, 660, 720));
        assert!(!intervals_overlap(660, 720, 600, 660));
    }

    #[test]
    fn test_no_overlap_disjoint() {
        assert!(!intervals_overlap(600, 660, 720, 780));
    }

    // ── available_slots ──

    #[test]
    fn test_slots_empty_calendar_full_day() {
        let slots: Vec<_> = available_slots(&config(), 60, &[]).collect();
        assert_eq!(slots.first(), Some(&t(9, 0)));
        assert_eq!(slots.last(), Some(&t(17, 0))); // 17:00 + 60min == close
        assert_eq!(slots.len(), 17); // 09:00..=17:00 every 30 min
    }

    #[test]
    fn test_slots_never_spill_past_close() {
        for duration in [15, 30, 45, 60, 90, 120, 240] {
            for slot in available_slots(&config(), duration, &[]) {
                let end = i64::from(slot.num_seconds_from_midnight()) / 60 + duration;
                assert!(end <= 18 * 60, "slot {} spills past close", slot);
            }
        }
    }

    #[test]
    fn test_slots_are_ascending() {
        let slots: Vec<_> = available_slots(&config(), 90, &[]).collect();
        for pair in slots.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_slots_skip_overlapping_candidates() {
        // 60-min service, existing 10:00-11:00 booking: 09:00 fits (ends at
        // 10:00 exactly), 09:30 through 10:30 collide, 11:00 fits again.
        let taken = [booked(1, t(10, 0), 60)];
        let slots: Vec<_> = available_slots(&config(), 60, &taken).collect();
        assert!(slots.contains(&t(9, 0)));
        assert!(!slots.contains(&t(9, 30)));
        assert!(!slots.contains(&t(10, 0)));
        assert!(!slots.contains(&t(10, 30)));
        assert!(slots.contains(&t(11, 0)));
    }

    #[test]
    fn test_slots_respect_existing_duration() {
        // A 120-min booking at 14:00 blocks candidates up to 16:00.
        let taken = [booked(1, t(14, 0), 120)];
        let slots: Vec<_> = available_slots(&config(), 30, &taken).collect();
        assert!(slots.contains(&t(13, 30)));
        assert!(!slots.contains(&t(14, 0)));
        assert!(!slots.contains(&t(15, 30)));
        assert!(slots.contains(&t(16, 0)));
    }

    #[test]
    fn test_slots_zero_duration_is_empty() {
        assert_eq!(available_slots(&config(), 0, &[]).count(), 0);
    }

    #[test]
    fn test_slots_negative_duration_is_empty() {
        assert_eq!(available_slots(&config(), -30, &[]).count(), 0);
    }

    #[test]
    fn test_slots_duration_longer_than_window_is_empty() {
        // Window is 9 hours; a 10-hour service never fits.
        assert_eq!(available_slots(&config(), 600, &[]).count(), 0);
    }

    #[test]
    fn test_slots_duration_exactly_window() {
        let slots: Vec<_> = available_slots(&config(), 9 * 60, &[]).collect();
        assert_eq!(slots, vec![t(9, 0)]);
    }

    #[test]
    fn test_slots_fully_booked_day_is_empty() {
        let taken = [booked(1, t(9, 0), 9 * 60)];
        assert_eq!(available_slots(&config(), 30, &taken).count(), 0);
    }

    #[test]
    fn test_slots_iterator_is_restartable() {
        let taken = [booked(1, t(10, 0), 60)];
        let iter = available_slots(&config(), 60, &taken);
        let replay = iter.clone();
        let first: Vec<_> = iter.collect();
        let second: Vec<_> = replay.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_slots_custom_config() {
        let config = ScheduleConfig {
            open: t(12, 0),
            close: t(20, 0),
            step_min: 60,
        };
        let slots: Vec<_> = available_slots(&config, 60, &[]).collect();
        assert_eq!(slots.first(), Some(&t(12, 0)));
        assert_eq!(slots.last(), Some(&t(19, 0)));
        assert_eq!(slots.len(), 8);
    }

    // ── validate_booking ──

    #[test]
    fn test_validate_accepts_free_slot() {
        let existing = [booked(1, t(10, 0), 60)];
        let result = validate_booking(d("2099-06-01"), t(11, 0), 60, d("2099-05-01"), &existing, None);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_validate_rejects_overlap_not_just_equal_start() {
        // 60-min service, existing booking at 10:00: 10:30 lands inside
        // 10:00-11:00 even though the start times differ.
        let existing = [booked(1, t(10, 0), 60)];
        let result = validate_booking(d("2099-06-01"), t(10, 30), 60, d("2099-05-01"), &existing, None);
        assert_eq!(
            result,
            Err(BookingError::Conflict {
                booking_id: 1,
                start: "10:00".into(),
                end: "11:00".into(),
            })
        );
    }

    #[test]
    fn test_validate_rejects_candidate_ending_inside_existing() {
        let existing = [booked(4, t(10, 0), 30)];
        let result = validate_booking(d("2099-06-01"), t(9, 45), 30, d("2099-05-01"), &existing, None);
        assert!(matches!(result, Err(BookingError::Conflict { booking_id: 4, .. })));
    }

    #[test]
    fn test_validate_accepts_adjacent_intervals() {
        let existing = [booked(1, t(10, 0), 60)];
        assert_eq!(
            validate_booking(d("2099-06-01"), t(11, 0), 60, d("2099-05-01"), &existing, None),
            Ok(())
        );
        assert_eq!(
            validate_booking(d("2099-06-01"), t(9, 0), 60, d("2099-05-01"), &existing, None),
            Ok(())
        );
    }

    #[test]
    fn test_validate_rejects_past_date() {
        let result = validate_booking(d("2099-05-01"), t(10, 0), 60, d("2099-05-02"), &[], None);
        assert_eq!(
            result,
            Err(BookingError::Validation("cannot book a date in the past".into()))
        );
    }

    #[test]
    fn test_validate_accepts_today() {
        let today = d("2099-05-02");
        assert_eq!(validate_booking(today, t(10, 0), 60, today, &[], None), Ok(()));
    }

    #[test]
    fn test_validate_edit_skips_own_interval() {
        // Rescheduling booking 5 within its own old interval is fine.
        let existing = [booked(5, t(10, 0), 60)];
        let result =
            validate_booking(d("2099-06-01"), t(10, 30), 60, d("2099-05-01"), &existing, Some(5));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_validate_edit_still_hits_other_bookings() {
        let existing = [booked(5, t(10, 0), 60), booked(6, t(12, 0), 60)];
        let result =
            validate_booking(d("2099-06-01"), t(12, 30), 60, d("2099-05-01"), &existing, Some(5));
        assert!(matches!(result, Err(BookingError::Conflict { booking_id: 6, .. })));
    }

    #[test]
    fn test_validate_edit_ignores_past_date_rule() {
        let existing = [booked(5, t(10, 0), 60)];
        let result =
            validate_booking(d("2020-01-01"), t(14, 0), 60, d("2099-05-01"), &existing, Some(5));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_validate_rejects_non_positive_duration() {
        let result = validate_booking(d("2099-06-01"), t(10, 0), 0, d("2099-05-01"), &[], None);
        assert_eq!(
            result,
            Err(BookingError::Validation("service duration must be positive".into()))
        );
    }

    // ── Cross-component properties ──

    #[test]
    fn test_every_offered_slot_validates() {
        // Round-trip: a slot from the calculator must pass the validator
        // against the same calendar.
        let taken = [booked(1, t(10, 0), 90), booked(2, t(15, 0), 30)];
        let date = d("2099-06-01");
        let today = d("2099-05-01");
        for slot in available_slots(&config(), 45, &taken) {
            assert_eq!(
                validate_booking(date, slot, 45, today, &taken, None),
                Ok(()),
                "offered slot {} failed validation",
                slot
            );
        }
    }

    #[test]
    fn test_accepted_bookings_stay_disjoint() {
        // Feed candidates through the validator one by one, committing the
        // accepted ones; every accepted pair must have disjoint intervals.
        let date = d("2099-06-01");
        let today = d("2099-05-01");
        let mut committed: Vec<BookedSlot> = Vec::new();
        let mut next_id = 1;
        for hour in 9..18 {
            for minute in [0, 15, 30, 45] {
                let start = t(hour, minute);
                if validate_booking(date, start, 50, today, &committed, None).is_ok() {
                    committed.push(booked(next_id, start, 50));
                    next_id += 1;
                }
            }
        }
        assert!(committed.len() > 1);
        for (i, a) in committed.iter().enumerate() {
            for b in &committed[i + 1..] {
                assert!(
                    !intervals_overlap(a.start_min(), a.end_min(), b.start_min(), b.end_min()),
                    "bookings {} and {} overlap",
                    a.booking_id,
                    b.booking_id
                );
            }
        }
    }
}
