//! Sequential invoice numbering
//!
//! Numbers look like `INV-YYYYMMDD-NNN`. The sequence restarts at `001` every
//! day and is zero-padded to at least three digits; it keeps counting past
//! `999` with a wider field instead of wrapping.

use time::{Date, Month};

const PREFIX: &str = "INV";

/// Derive the next invoice number from the last one issued by the same owner
///
/// Pure function: uniqueness under concurrent creation is enforced by the
/// datastore's `(owner_id, invoice_number)` constraint, not here.
pub fn next_invoice_number(last_number: Option<&str>, today: Date) -> String {
    let sequence = match last_number.and_then(parse_invoice_number) {
        Some((date, seq)) if date == today => seq.saturating_add(1),
        _ => 1,
    };
    format_invoice_number(today, sequence)
}

/// Render a number for `date` and `sequence`
pub fn format_invoice_number(date: Date, sequence: u32) -> String {
    format!(
        "{}-{:04}{:02}{:02}-{:03}",
        PREFIX,
        date.year(),
        u8::from(date.month()),
        date.day(),
        sequence
    )
}

/// Split a well-formed invoice number into its date and sequence
///
/// Returns `None` for anything that does not match the expected pattern,
/// including impossible calendar dates.
pub fn parse_invoice_number(number: &str) -> Option<(Date, u32)> {
    let mut parts = number.trim().splitn(3, '-');
    if parts.next()? != PREFIX {
        return None;
    }

    let date_part = parts.next()?;
    let seq_part = parts.next()?;
    if date_part.len() != 8 || !date_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if seq_part.len() < 3 || !seq_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = date_part[0..4].parse().ok()?;
    let month: u8 = date_part[4..6].parse().ok()?;
    let day: u8 = date_part[6..8].parse().ok()?;
    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;

    let sequence: u32 = seq_part.parse().ok()?;
    Some((date, sequence))
}
