//! Quiet-hours and send-time calculation.
//!
//! A future `scheduled_at` is honored as-is. Otherwise the recipient's local
//! time decides: inside the quiet-hours window (configured, or the 22:00 to
//! 08:00 default) the send defers to the window end, except for urgent
//! priority which always sends immediately.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use courier_contract::{MessageRecipient, MessageRequest, QuietHoursWindow};

/// Resolves an IANA timezone name, falling back to UTC on unknown zones.
pub fn resolve_timezone(name: &str) -> Tz {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return chrono_tz::UTC;
    }
    trimmed.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = trimmed, "unknown recipient timezone, using UTC");
        chrono_tz::UTC
    })
}

fn in_window(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= time && time < end
    } else {
        // Overnight window, e.g. 22:00..08:00.
        time >= start || time < end
    }
}

/// Next quiet-hours end boundary when `now` falls inside the window.
///
/// Returns `None` when the recipient-local time is outside the window.
pub fn next_window_end(
    window: &QuietHoursWindow,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let (start, end) = match window.parse_bounds() {
        Ok(bounds) => bounds,
        Err(error) => {
            warn!(%error, "unparseable quiet-hours window, treating as unset");
            let default = QuietHoursWindow::default();
            default.parse_bounds().ok()?
        }
    };
    let local = now.with_timezone(&timezone);
    let time = local.time();
    if !in_window(time, start, end) {
        return None;
    }
    let end_date = if start <= end || time < end {
        local.date_naive()
    } else {
        local.date_naive() + Duration::days(1)
    };
    let naive_end = end_date.and_time(end);
    match timezone.from_local_datetime(&naive_end).earliest() {
        Some(boundary) => Some(boundary.with_timezone(&Utc)),
        None => {
            // DST gap right on the boundary; nudge an hour forward.
            timezone
                .from_local_datetime(&(naive_end + Duration::hours(1)))
                .earliest()
                .map(|boundary| boundary.with_timezone(&Utc))
        }
    }
}

/// Decides when a request should send.
///
/// Urgent priority always sends immediately; everything else defers through
/// an explicit future `scheduled_at` or the recipient's quiet hours.
pub fn calculate_send_time(
    request: &MessageRequest,
    recipient: &MessageRecipient,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if let Some(scheduled_at) = request.scheduled_at {
        if scheduled_at > now {
            return scheduled_at;
        }
    }
    if request.priority.bypasses_quiet_hours() {
        return now;
    }
    let window = recipient.quiet_hours.clone().unwrap_or_default();
    let timezone = resolve_timezone(
        window
            .timezone
            .as_deref()
            .unwrap_or(recipient.timezone.as_str()),
    );
    next_window_end(&window, timezone, now).unwrap_or(now)
}
