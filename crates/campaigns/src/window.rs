//! Fixed UTC clock-hour windows for per-sender quotas.
//!
//! Counts reset at every UTC hour boundary. This is not a rolling 60 minute window.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

use mailflow_core::SenderId;

/// One UTC calendar hour.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HourWindow {
    date: NaiveDate,
    hour: u32,
}

impl HourWindow {
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            date: at.date_naive(),
            hour: at.hour(),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.date
            .and_hms_opt(self.hour, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// First instant of the following hour (strictly after every instant in this window).
    pub fn next_boundary(&self) -> DateTime<Utc> {
        self.start() + Duration::hours(1)
    }

    /// Counter key, e.g. `ratelimit:{sender}:2024-06-01:9`.
    pub fn key(&self, sender_id: SenderId) -> String {
        format!(
            "ratelimit:{}:{}:{}",
            sender_id,
            self.date.format("%Y-%m-%d"),
            self.hour
        )
    }

    /// Time from `now` until the next UTC hour boundary.
    pub fn delay_until_next(now: DateTime<Utc>) -> StdDuration {
        (Self::containing(now).next_boundary() - now)
            .to_std()
            .unwrap_or(StdDuration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn key_uses_date_and_unpadded_hour() {
        let sender = SenderId::new();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 41, 7).unwrap();
        assert_eq!(
            HourWindow::containing(at).key(sender),
            format!("ratelimit:{sender}:2024-06-01:9")
        );
    }

    #[test]
    fn next_boundary_rolls_over_midnight() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            HourWindow::containing(at).next_boundary(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn delay_on_exact_boundary_is_a_full_hour() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(HourWindow::delay_until_next(at), StdDuration::from_secs(3600));
    }

    #[test]
    fn delay_counts_milliseconds() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 59, 59).unwrap()
            + Duration::milliseconds(250);
        assert_eq!(HourWindow::delay_until_next(at), StdDuration::from_millis(750));
    }

    proptest! {
        /// Property: the retry delay always lands exactly on the next hour boundary.
        #[test]
        fn delay_lands_on_next_hour(secs in 0i64..4_000_000_000, millis in 0i64..1000) {
            let now = Utc.timestamp_opt(secs, 0).unwrap() + Duration::milliseconds(millis);
            let delay = HourWindow::delay_until_next(now);
            let fire_at = now + Duration::from_std(delay).unwrap();

            prop_assert!(delay > StdDuration::ZERO);
            prop_assert!(delay <= StdDuration::from_secs(3600));
            prop_assert_eq!(fire_at.minute(), 0);
            prop_assert_eq!(fire_at.second(), 0);
            prop_assert_eq!(fire_at.timestamp_subsec_millis(), 0);
            prop_assert_ne!(HourWindow::containing(now), HourWindow::containing(fire_at));
        }
    }
}
