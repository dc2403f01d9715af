use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::errors::AppError;

/// A sensor timestamp as it arrives on the wire, before normalization.
/// Clients send either epoch seconds (integer or fractional) or an
/// ISO-8601 string, optionally with a trailing `Z`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    EpochSeconds(f64),
    Text(String),
}

impl RawTimestamp {
    /// Builds a raw timestamp from a query-string value, where everything
    /// arrives as text: values that read as a number are epoch seconds,
    /// anything else is treated as an ISO string.
    pub fn from_query_value(value: &str) -> Self {
        match value.parse::<f64>() {
            Ok(secs) => RawTimestamp::EpochSeconds(secs),
            Err(_) => RawTimestamp::Text(value.to_string()),
        }
    }

    /// Arrival-time stamp for payloads that carry no sensor timestamp at
    /// all. Microsecond resolution: `recorded_at` is the dedup key, so two
    /// posts landing within the same wall-clock second must stay distinct.
    pub fn arrival_now() -> Self {
        RawTimestamp::EpochSeconds(Utc::now().timestamp_micros() as f64 / 1e6)
    }
}

/// Normalizes a raw timestamp to a timezone-naive instant.
///
/// Numeric values are seconds since the Unix epoch (fractional seconds
/// allowed), taken as UTC. Strings ending in `Z` have the suffix stripped
/// first; then the cascade is strict ISO-8601, `%Y-%m-%dT%H:%M:%S%.f`,
/// `%Y-%m-%dT%H:%M:%S`. Anything unparseable is a `MalformedTimestamp`
/// error — a wall-clock guess is never substituted for a sensor timestamp.
pub fn normalize(raw: &RawTimestamp) -> Result<NaiveDateTime, AppError> {
    match raw {
        RawTimestamp::EpochSeconds(secs) => from_epoch_seconds(*secs),
        RawTimestamp::Text(s) => parse_text(s),
    }
}

fn from_epoch_seconds(secs: f64) -> Result<NaiveDateTime, AppError> {
    if !secs.is_finite() {
        return Err(AppError::MalformedTimestamp(format!("{secs}")));
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| AppError::MalformedTimestamp(format!("epoch seconds {secs} out of range")))
}

fn parse_text(s: &str) -> Result<NaiveDateTime, AppError> {
    let trimmed = s.strip_suffix('Z').unwrap_or(s);

    if let Ok(dt) = trimmed.parse::<NaiveDateTime>() {
        return Ok(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }
    Err(AppError::MalformedTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_epoch_seconds() {
        let got = normalize(&RawTimestamp::EpochSeconds(1_700_000_000.0)).unwrap();
        assert_eq!(got, ts(2023, 11, 14, 22, 13, 20));
    }

    #[test]
    fn test_iso_string() {
        let got = normalize(&RawTimestamp::Text("2023-11-14T22:13:20".into())).unwrap();
        assert_eq!(got, ts(2023, 11, 14, 22, 13, 20));
    }

    #[test]
    fn test_z_suffix_with_fraction() {
        let got = normalize(&RawTimestamp::Text("2023-11-14T22:13:20.500Z".into())).unwrap();
        assert_eq!(got.date(), ts(2023, 11, 14, 22, 13, 20).date());
        assert_eq!(got.second(), 20);
        assert_eq!(got.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_epoch_and_iso_agree() {
        let from_epoch = normalize(&RawTimestamp::EpochSeconds(1_700_000_000.0)).unwrap();
        let from_text = normalize(&RawTimestamp::Text("2023-11-14T22:13:20Z".into())).unwrap();
        assert_eq!(from_epoch, from_text);
    }

    #[test]
    fn test_fractional_epoch() {
        let got = normalize(&RawTimestamp::EpochSeconds(1_700_000_000.25)).unwrap();
        assert_eq!(got.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_garbage_is_an_error_not_now() {
        let err = normalize(&RawTimestamp::Text("yesterday-ish".into()));
        assert!(matches!(err, Err(AppError::MalformedTimestamp(_))));
    }

    #[test]
    fn test_query_value_dispatch() {
        let numeric = RawTimestamp::from_query_value("1700000000");
        assert_eq!(normalize(&numeric).unwrap(), ts(2023, 11, 14, 22, 13, 20));

        let textual = RawTimestamp::from_query_value("2023-11-14T22:13:20");
        assert_eq!(normalize(&textual).unwrap(), ts(2023, 11, 14, 22, 13, 20));
    }

    #[test]
    fn test_same_second_arrivals_stay_distinct() {
        // Two arrivals inside the same wall-clock second must normalize to
        // different instants, or the second one would be dropped as a
        // duplicate of the first.
        let first = normalize(&RawTimestamp::EpochSeconds(1_709_283_600.1)).unwrap();
        let second = normalize(&RawTimestamp::EpochSeconds(1_709_283_600.4)).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.second(), second.second());
    }

    #[test]
    fn test_arrival_now_carries_microseconds() {
        let RawTimestamp::EpochSeconds(secs) = RawTimestamp::arrival_now() else {
            panic!("arrival stamp must be numeric");
        };
        // Microsecond counts for current dates fit an f64 mantissa exactly,
        // so the stamp is not quantized to whole seconds.
        assert!(secs * 1e6 < 9.0e15);
        let normalized = normalize(&RawTimestamp::EpochSeconds(secs)).unwrap();
        let micros = Utc::now().timestamp_micros();
        let stamped = (secs * 1e6).round() as i64;
        assert!((micros - stamped).abs() < 5_000_000, "stamp far from now");
        assert!(normalized.and_utc().timestamp() > 1_700_000_000);
    }

    #[test]
    fn test_non_finite_epoch_rejected() {
        assert!(matches!(
            normalize(&RawTimestamp::EpochSeconds(f64::NAN)),
            Err(AppError::MalformedTimestamp(_))
        ));
    }
}
