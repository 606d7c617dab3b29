/// Time utilities for exchange calendar handling
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SyncError};

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SyncError::Config(format!("Unknown timezone: {}", name)))
}

/// Calendar date "today" as observed at the exchange
pub fn market_today(tz: Tz) -> NaiveDate {
    market_date_at(Utc::now(), tz)
}

/// Calendar date of an instant as observed at the exchange
pub fn market_date_at(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    #[test]
    fn test_market_date_crosses_midnight() {
        // 02:00 UTC is still the previous evening in New York
        let instant = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        let date = market_date_at(instant, New_York);
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("America/New_York").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
