//! Statement periods.
//!
//! A period is a pair of calendar dates read as UTC midnights: the start day
//! is included, the end day is not.

use chrono::{DateTime, NaiveDate, Utc};

use super::StatementError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open UTC interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Period {
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, StatementError> {
        if start >= end {
            return Err(StatementError::InvalidPeriod { start, end });
        }
        Ok(Self {
            start: start.and_time(chrono::NaiveTime::MIN).and_utc(),
            end: end.and_time(chrono::NaiveTime::MIN).and_utc(),
        })
    }

    /// Parse `YYYY-MM-DD` bounds
    pub fn parse(start: &str, end: &str) -> Result<Self, StatementError> {
        Self::from_dates(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, StatementError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| StatementError::MalformedDate(value.to_string()))
}
