//! Retention purge scheduling

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{LogStore, PurgeCounts};

/// Earliest delay before the first automatic purge, in minutes
const MIN_FIRST_PURGE_DELAY_MINUTES: i64 = 30;

/// When the first automatic purge of a session runs
///
/// The oldest record becomes purgeable `keep + interval` after it was fired.
/// The result never comes sooner than 30 minutes from now, nor later than a
/// full `keep + interval` from now.
pub fn first_purge_at(
    now: DateTime<Utc>,
    oldest_time_fired: Option<DateTime<Utc>>,
    keep_days: u32,
    interval_days: u32,
) -> DateTime<Utc> {
    let span = Duration::days(i64::from(keep_days) + i64::from(interval_days));
    let later = |from: DateTime<Utc>, by: Duration| {
        from.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
    };
    let latest = later(now, span);
    let earliest = later(now, Duration::minutes(MIN_FIRST_PURGE_DELAY_MINUTES));
    match oldest_time_fired {
        Some(oldest) => later(oldest, span).max(earliest).min(latest),
        None => latest,
    }
}

/// Records fired strictly before this instant are purged
///
/// Saturates at the earliest representable time.
pub fn purge_cutoff(now: DateTime<Utc>, keep_days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(keep_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Delete everything older than `keep_days`
pub fn purge_old_data(store: &mut dyn LogStore, keep_days: u32) -> Result<PurgeCounts, StoreError> {
    let cutoff = purge_cutoff(Utc::now(), keep_days);
    debug!(%cutoff, keep_days, "Purging old recorder data");
    let counts = store.purge_before(cutoff)?;
    info!(
        events = counts.events,
        states = counts.states,
        keep_days,
        "Purged old recorder data"
    );
    Ok(counts)
}
