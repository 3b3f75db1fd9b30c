//! Date-range availability checks for apartment bookings.
//!
//! Ranges are half-open `[check_in, check_out)`: the check-out day is free
//! for the next guest's check-in, so back-to-back stays never conflict.

use chrono::NaiveDate;

use crate::error::AppError;
use crate::models::Booking;

/// Half-open interval overlap: `[s1, e1)` and `[s2, e2)` conflict
/// iff `s1 < e2 && s2 < e1`.
pub fn ranges_overlap(s1: NaiveDate, e1: NaiveDate, s2: NaiveDate, e2: NaiveDate) -> bool {
    s1 < e2 && s2 < e1
}

/// True iff the candidate range conflicts with none of the bookings that
/// currently occupy dates (pending or confirmed). Pure; safe to call
/// repeatedly for calendar hints.
pub fn is_range_available(check_in: NaiveDate, check_out: NaiveDate, existing: &[Booking]) -> bool {
    existing
        .iter()
        .filter(|b| b.status.blocks_dates())
        .all(|b| !ranges_overlap(check_in, check_out, b.check_in, b.check_out))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Неверный формат даты: {}", s)))
}

/// Parses and validates a candidate stay range. Zero-night ranges
/// (`check_out == check_in`) are invalid, not "always available".
pub fn validate_range(check_in: &str, check_out: &str) -> Result<(NaiveDate, NaiveDate), AppError> {
    let check_in = parse_date(check_in)?;
    let check_out = parse_date(check_out)?;
    if check_out <= check_in {
        return Err(AppError::Validation(
            "Дата выезда должна быть позже даты заезда".into(),
        ));
    }
    Ok((check_in, check_out))
}

pub fn nights(check_in: NaiveDate, check_out: NaiveDate) -> i64 {
    (check_out - check_in).num_days()
}

// ── Tests ──
