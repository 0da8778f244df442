//! Token lifetime handling.
//!
//! The configured lifetime uses the `[-][d.]hh:mm[:ss[.fffffff]]` duration notation (a bare integer
//! is a number of days). The computed expiry is expressed in POSIX seconds.

use time::{Duration, OffsetDateTime};

use crate::{Error, Result};

/// Lifetime applied when no lifetime is configured.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::minutes(1);

const MAX_FRACTION_DIGITS: usize = 7;
const EXPECTED_FORMAT: &str = "expected [d.]hh:mm[:ss[.fffffff]]";

/// Computes the absolute token expiry in whole seconds since the epoch.
///
/// An absent or empty `configured` value means [`DEFAULT_TOKEN_LIFETIME`]. A present value that
/// cannot be parsed is a configuration error: it never falls back to the default.
pub fn compute_expiry(now: OffsetDateTime, configured: Option<&str>) -> Result<i64> {
    let lifetime = match configured {
        None | Some("") => DEFAULT_TOKEN_LIFETIME,
        Some(value) => parse_lifetime(value)?,
    };

    let expires_on = now.checked_add(lifetime).ok_or_else(|| Error::InvalidLifetime {
        value: configured.unwrap_or_default().to_owned(),
        reason: "expiry is out of range",
    })?;

    // `unix_timestamp` drops the sub-second part.
    Ok(expires_on.unix_timestamp())
}

/// Parses a configured token lifetime.
pub fn parse_lifetime(value: &str) -> Result<Duration> {
    let invalid = |reason| Error::InvalidLifetime {
        value: value.to_owned(),
        reason,
    };

    let duration = parse_duration(value).map_err(invalid)?;

    if duration.is_negative() {
        return Err(invalid("lifetime must not be negative"));
    }

    Ok(duration)
}

fn parse_duration(value: &str) -> std::result::Result<Duration, &'static str> {
    let value = value.trim();
    let (negative, value) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let parts: Vec<&str> = value.split(':').collect();

    let (days, hours, minutes, seconds) = match parts.as_slice() {
        [days] => (parse_number(days, u32::MAX)?, 0, 0, None),
        [days, hours, minutes, seconds] => (
            parse_number(days, u32::MAX)?,
            parse_number(hours, 23)?,
            parse_number(minutes, 59)?,
            Some(*seconds),
        ),
        [hours, minutes] | [hours, minutes, _] => {
            let (days, hours) = match hours.split_once('.') {
                Some((days, hours)) => (parse_number(days, u32::MAX)?, hours),
                None => (0, *hours),
            };

            // .NET `TimeSpan.Parse` reads an out-of-range "24:00:00" as 24 days; rejected here
            (days, parse_number(hours, 23)?, parse_number(minutes, 59)?, parts.get(2).copied())
        }
        _ => return Err(EXPECTED_FORMAT),
    };

    let (seconds, nanoseconds) = match seconds {
        Some(seconds) => parse_seconds(seconds)?,
        None => (0, 0),
    };

    let duration = Duration::days(i64::from(days))
        + Duration::hours(i64::from(hours))
        + Duration::minutes(i64::from(minutes))
        + Duration::seconds(i64::from(seconds))
        + Duration::nanoseconds(i64::from(nanoseconds));

    Ok(if negative { -duration } else { duration })
}

fn parse_seconds(value: &str) -> std::result::Result<(u32, u32), &'static str> {
    let Some((seconds, fraction)) = value.split_once('.') else {
        return Ok((parse_number(value, 59)?, 0));
    };

    if fraction.is_empty() || fraction.len() > MAX_FRACTION_DIGITS || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err("invalid fraction of a second");
    }

    // pad to nanoseconds: "5" -> 500_000_000
    let nanoseconds = format!("{fraction:0<9}").parse().map_err(|_| "invalid fraction of a second")?;

    Ok((parse_number(seconds, 59)?, nanoseconds))
}

fn parse_number(value: &str, max: u32) -> std::result::Result<u32, &'static str> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EXPECTED_FORMAT);
    }

    match value.parse::<u32>() {
        Ok(number) if number <= max => Ok(number),
        _ => Err("duration component is out of range"),
    }
}
