//! Day rollover detection.
//!
//! The detector keeps the watermark of the most recent record that was
//! accepted as "current". A record closes the previous day only when it falls
//! on a different day, arrives after the watermark, and is past the grace
//! hour. The grace hour absorbs stragglers from the previous day that are
//! still arriving shortly after midnight.

use chrono::{Days, NaiveDate, NaiveDateTime, Timelike};

/// Default grace period, in hours into the new day.
pub const DEFAULT_GRACE_HOURS: u32 = 2;

/// The day a record belongs to.
pub fn day_key(ts: &NaiveDateTime) -> NaiveDate {
    ts.date()
}

/// Outcome of observing one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverDecision {
    /// Keep writing; nothing to archive.
    Hold,
    /// The previous day is closed.
    Roll {
        /// Day to archive now.
        ship_date: NaiveDate,
        /// Older day whose leftover file, if present, is archived too.
        recovery_check_date: NaiveDate,
    },
}

/// Tracks the watermark across records.
#[derive(Debug, Clone)]
pub struct RolloverDetector {
    last_observed: Option<NaiveDateTime>,
    current_date_string: Option<String>,
    grace_hours: u32,
}

impl Default for RolloverDetector {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_HOURS)
    }
}

impl RolloverDetector {
    pub fn new(grace_hours: u32) -> Self {
        Self {
            last_observed: None,
            current_date_string: None,
            grace_hours,
        }
    }

    /// Timestamp of the record that last set the watermark.
    pub fn last_observed(&self) -> Option<NaiveDateTime> {
        self.last_observed
    }

    /// Raw text of the most recently observed timestamp.
    pub fn current_date_string(&self) -> Option<&str> {
        self.current_date_string.as_deref()
    }

    /// Feed a record's timestamp and decide whether a day has closed.
    ///
    /// The raw text is always remembered. The watermark only moves on the
    /// first observation and on a roll; late or same-day records leave it
    /// where it is.
    pub fn observe(&mut self, ts: NaiveDateTime, raw: &str) -> RolloverDecision {
        self.current_date_string = Some(raw.to_string());

        let Some(last) = self.last_observed else {
            self.last_observed = Some(ts);
            return RolloverDecision::Hold;
        };

        let day_changed = day_key(&ts) != day_key(&last);
        let grace_passed = ts.hour() > self.grace_hours;
        if !(day_changed && grace_passed && last < ts) {
            return RolloverDecision::Hold;
        }

        let day = day_key(&ts);
        let (Some(ship_date), Some(recovery_check_date)) =
            (day.checked_sub_days(Days::new(1)), day.checked_sub_days(Days::new(2)))
        else {
            return RolloverDecision::Hold;
        };

        self.last_observed = Some(ts);
        RolloverDecision::Roll {
            ship_date,
            recovery_check_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_observation_sets_watermark() {
        let mut detector = RolloverDetector::default();
        assert_eq!(
            detector.observe(at(2024, 1, 1, 23), "01/Jan/2024:23:00:00"),
            RolloverDecision::Hold
        );
        assert_eq!(detector.last_observed(), Some(at(2024, 1, 1, 23)));
        assert_eq!(detector.current_date_string(), Some("01/Jan/2024:23:00:00"));
    }

    #[test]
    fn test_same_day_never_rolls() {
        let mut detector = RolloverDetector::default();
        for hour in 0..24 {
            assert_eq!(
                detector.observe(at(2024, 1, 1, hour), "same day"),
                RolloverDecision::Hold
            );
        }
        assert_eq!(detector.last_observed(), Some(at(2024, 1, 1, 0)));
    }

    #[test]
    fn test_within_grace_period_holds() {
        let mut detector = RolloverDetector::default();
        detector.observe(at(2024, 1, 1, 23), "a");
        assert_eq!(detector.observe(at(2024, 1, 2, 1), "b"), RolloverDecision::Hold);
        assert_eq!(detector.observe(at(2024, 1, 2, 2), "c"), RolloverDecision::Hold);
        assert_eq!(detector.last_observed(), Some(at(2024, 1, 1, 23)));
        assert_eq!(detector.current_date_string(), Some("c"));
    }

    #[test]
    fn test_past_grace_period_rolls() {
        let mut detector = RolloverDetector::default();
        detector.observe(at(2024, 1, 1, 23), "a");
        assert_eq!(
            detector.observe(at(2024, 1, 2, 3), "b"),
            RolloverDecision::Roll {
                ship_date: date(2024, 1, 1),
                recovery_check_date: date(2023, 12, 31),
            }
        );
        assert_eq!(detector.last_observed(), Some(at(2024, 1, 2, 3)));

        // the new day is now current
        assert_eq!(detector.observe(at(2024, 1, 2, 4), "c"), RolloverDecision::Hold);
    }

    #[test]
    fn test_late_record_from_earlier_day_holds() {
        let mut detector = RolloverDetector::default();
        detector.observe(at(2024, 1, 2, 10), "a");
        assert_eq!(detector.observe(at(2024, 1, 1, 23), "b"), RolloverDecision::Hold);
        assert_eq!(detector.last_observed(), Some(at(2024, 1, 2, 10)));
    }

    #[test]
    fn test_gap_of_several_days_ships_previous_day_only() {
        let mut detector = RolloverDetector::default();
        detector.observe(at(2024, 1, 1, 12), "a");
        assert_eq!(
            detector.observe(at(2024, 1, 5, 12), "b"),
            RolloverDecision::Roll {
                ship_date: date(2024, 1, 4),
                recovery_check_date: date(2024, 1, 3),
            }
        );
    }

    #[test]
    fn test_zero_grace_hours() {
        let mut detector = RolloverDetector::new(0);
        detector.observe(at(2024, 1, 1, 23), "a");
        assert_eq!(detector.observe(at(2024, 1, 2, 0), "b"), RolloverDecision::Hold);
        assert!(matches!(
            detector.observe(at(2024, 1, 2, 1), "c"),
            RolloverDecision::Roll { .. }
        ));
    }
}
