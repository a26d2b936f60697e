use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

pub fn day_key(day: NaiveDate) -> String {
    format!("metric:{}", day.format("%Y-%m-%d"))
}

pub fn day_key_for(at: DateTime<Utc>) -> String {
    day_key(at.date_naive())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DailyMetrics {
    pub day_key: String,
    pub processed: u64,
    pub errors: u64,
    pub retried: u64,
    pub total_processing_time_ms: u64,
}

impl DailyMetrics {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day_key: day_key(day),
            processed: 0,
            errors: 0,
            retried: 0,
            total_processing_time_ms: 0,
        }
    }

    pub fn average_processing_ms(&self) -> Option<u64> {
        (self.processed > 0).then(|| self.total_processing_time_ms / self.processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_key_uses_iso_date() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 9).expect("valid date");
        assert_eq!(day_key(day), "metric:2026-03-09");
    }

    #[test]
    fn average_is_undefined_without_processed_messages() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 9).expect("valid date");
        let mut metrics = DailyMetrics::empty(day);
        assert_eq!(metrics.average_processing_ms(), None);

        metrics.processed = 4;
        metrics.total_processing_time_ms = 100;
        assert_eq!(metrics.average_processing_ms(), Some(25));
    }
}
