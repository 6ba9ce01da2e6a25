//! Auto-sync cooldown
//!
//! Pure functions over the stored cursor, so the operator surface can decide
//! whether an automatic round is due without touching the engine.

use chrono::{DateTime, Duration, Utc};

/// Whether an automatic round may start, given the last successful sync
pub fn cooldown_elapsed(last_synced_at: Option<DateTime<Utc>>, cooldown_secs: u64) -> bool {
    cooldown_remaining(last_synced_at, cooldown_secs, Utc::now()).is_none()
}

/// Time left before the next automatic round, measured at `now`.
///
/// `None` when never synced or the cooldown has passed.
pub fn cooldown_remaining(
    last_synced_at: Option<DateTime<Utc>>,
    cooldown_secs: u64,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last = last_synced_at?;
    let due = i64::try_from(cooldown_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|cooldown| last.checked_add_signed(cooldown));

    match due {
        Some(due) if due > now => Some(due - now),
        Some(_) => None,
        None => Some(Duration::MAX),
    }
}
