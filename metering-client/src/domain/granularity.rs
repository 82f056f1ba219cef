use std::{fmt, str::FromStr, time::Duration};

use time::{OffsetDateTime, Time};

/// Aggregation period of a cost row.
///
/// Each granularity has a trailing window length (how far back samples are
/// read) and a calendar alignment rule (how the row is labelled). The two are
/// independent: the `hour` row for `14:00` is rewritten throughout the hour
/// with the cost of the trailing window ending at each evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Month,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown granularity '{0}'")]
pub struct UnknownGranularity(pub String);

impl Granularity {
    /// Evaluation order. Month comes last.
    pub const ALL: [Granularity; 4] = [
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
    ];

    /// Value stored in the `period_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
        }
    }

    /// Default trailing window length. A month is always 30 days.
    pub fn default_window(self) -> Duration {
        const DAY: u64 = 86_400;
        match self {
            Granularity::Minute => Duration::from_secs(60),
            Granularity::Hour => Duration::from_secs(3_600),
            Granularity::Day => Duration::from_secs(DAY),
            Granularity::Month => Duration::from_secs(30 * DAY),
        }
    }

    /// Truncate `ts` to the start of its bucket, in the offset `ts` carries.
    ///
    /// - minute: drop seconds and sub-seconds
    /// - hour: drop minutes and below
    /// - day: midnight of the same date
    /// - month: midnight of the first day of the month
    pub fn align(self, ts: OffsetDateTime) -> OffsetDateTime {
        let midnight = ts.replace_time(Time::MIDNIGHT);
        match self {
            Granularity::Minute => {
                midnight
                    + time::Duration::hours(i64::from(ts.hour()))
                    + time::Duration::minutes(i64::from(ts.minute()))
            }
            Granularity::Hour => midnight + time::Duration::hours(i64::from(ts.hour())),
            Granularity::Day => midnight,
            Granularity::Month => midnight - time::Duration::days(i64::from(ts.day()) - 1),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = UnknownGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            other => Err(UnknownGranularity(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn aligns_each_granularity_to_its_bucket_start() {
        let now = datetime!(2024-03-15 14:37:52.250 UTC);

        assert_eq!(Granularity::Minute.align(now), datetime!(2024-03-15 14:37:00 UTC));
        assert_eq!(Granularity::Hour.align(now), datetime!(2024-03-15 14:00:00 UTC));
        assert_eq!(Granularity::Day.align(now), datetime!(2024-03-15 00:00:00 UTC));
        assert_eq!(Granularity::Month.align(now), datetime!(2024-03-01 00:00:00 UTC));
    }

    #[test]
    fn alignment_follows_the_offset_of_the_timestamp() {
        // 2024-03-31 23:30 UTC is already April 1st in UTC+7.
        let now = datetime!(2024-03-31 23:30:00 UTC).to_offset(offset!(+7));

        assert_eq!(Granularity::Day.align(now), datetime!(2024-04-01 00:00:00 +7));
        assert_eq!(Granularity::Month.align(now), datetime!(2024-04-01 00:00:00 +7));
    }

    #[test]
    fn aligned_bucket_is_a_fixed_point() {
        let now = datetime!(2024-02-29 08:15:09 UTC);
        for g in Granularity::ALL {
            let bucket = g.align(now);
            assert_eq!(g.align(bucket), bucket, "{g}");
            assert!(bucket <= now);
        }
    }

    #[test]
    fn default_windows_are_nested() {
        let windows: Vec<_> = Granularity::ALL.iter().map(|g| g.default_window()).collect();
        assert!(windows.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Granularity::Month.default_window().as_secs(), 30 * 86_400);
    }

    #[test]
    fn parses_period_type_names() {
        for g in Granularity::ALL {
            assert_eq!(g.as_str().parse::<Granularity>(), Ok(g));
        }
        assert!(matches!(
            "week".parse::<Granularity>(),
            Err(UnknownGranularity(name)) if name == "week"
        ));
    }
}
