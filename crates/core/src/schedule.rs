//! Cron schedule for periodic imports.
//!
//! Accepts the common 5-field form (`min hour dom month dow`) as well as the
//! 6/7-field form with a leading seconds field understood by the `cron`
//! crate. Five-field expressions fire at second zero.

use std::str::FromStr;

use chrono::Utc;

use crate::error::SyncError;
use crate::types::Timestamp;

/// A parsed, validated import schedule.
#[derive(Debug, Clone)]
pub struct ImportSchedule {
    expr: String,
    schedule: cron::Schedule,
}

impl ImportSchedule {
    /// Parse a cron expression, reporting a configuration error when invalid.
    pub fn parse(expr: &str) -> Result<Self, SyncError> {
        let trimmed = expr.trim();
        let fields = trimmed.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            _ => {
                return Err(SyncError::Configuration(format!(
                    "Invalid schedule '{trimmed}': expected 5 fields (min hour dom month dow)"
                )))
            }
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            SyncError::Configuration(format!("Invalid schedule '{trimmed}': {e}"))
        })?;

        // Reject expressions that can never fire.
        if schedule.after(&Utc::now()).next().is_none() {
            return Err(SyncError::Configuration(format!(
                "Schedule '{trimmed}' never fires"
            )));
        }

        Ok(Self {
            expr: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: Timestamp) -> Option<Timestamp> {
        self.schedule.after(&after).next()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn five_field_daily_schedule() {
        let schedule = ImportSchedule::parse("0 3 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 10, 2, 15, 0).unwrap();
        assert_eq!(
            schedule.next_after(from),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap())
        );
    }

    #[test]
    fn next_fire_rolls_over_to_next_day() {
        let schedule = ImportSchedule::parse("0 3 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(from),
            Some(Utc.with_ymd_and_hms(2024, 3, 11, 3, 0, 0).unwrap())
        );
    }

    #[test]
    fn step_schedule() {
        let schedule = ImportSchedule::parse("*/15 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 10, 10, 7, 0).unwrap();
        assert_eq!(
            schedule.next_after(from),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 10, 15, 0).unwrap())
        );
    }

    #[test]
    fn six_field_form_accepted() {
        let schedule = ImportSchedule::parse("30 0 4 * * *").unwrap();
        assert_eq!(schedule.expression(), "30 0 4 * * *");
    }

    #[test]
    fn wrong_field_count_rejected() {
        assert_matches!(
            ImportSchedule::parse("every day"),
            Err(SyncError::Configuration(_))
        );
    }

    #[test]
    fn out_of_range_value_rejected() {
        assert_matches!(
            ImportSchedule::parse("61 * * * *"),
            Err(SyncError::Configuration(_))
        );
    }
}
