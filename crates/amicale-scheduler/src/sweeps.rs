//! Calendar-driven maintenance: membership expiry, parameter rollover and
//! membership-window closing. Every step is idempotent per day, so the
//! sweep can run on any interval without double effects.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use tracing::info;

use amicale_db::Database;
use amicale_types::models::{Org, Parameter};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CalendarOutcome {
    /// Active memberships of past years flipped to expired.
    pub expired: usize,
    /// Parameter rows materialized for the current year.
    pub rolled: usize,
    /// Membership windows closed because their close date passed.
    pub closed: usize,
}

pub fn run_calendar_sweep(db: &Database, today: NaiveDate) -> Result<CalendarOutcome> {
    let year = today.year();
    let mut outcome = CalendarOutcome {
        expired: db.expire_memberships_before(year)?,
        ..Default::default()
    };

    // Year rollover: make sure each org has a parameter row for the new
    // year. Fees carry over from the latest prior year; the window stays
    // closed until an admin opens it.
    for org in [Org::A, Org::B] {
        if db.get_parameter(org, year)?.is_some() {
            continue;
        }
        let fees = match db.latest_fees_before(org, year)? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        db.insert_parameter(&Parameter {
            org,
            year,
            fees,
            membership_open: false,
            close_date: None,
            created_at: Utc::now(),
        })?;
        outcome.rolled += 1;
    }

    outcome.closed = db.close_due_windows(today)?;

    if outcome != CalendarOutcome::default() {
        info!(
            "Calendar sweep: {} membership(s) expired, {} parameter row(s) rolled, {} window(s) closed",
            outcome.expired, outcome.rolled, outcome.closed
        );
    }
    Ok(outcome)
}
