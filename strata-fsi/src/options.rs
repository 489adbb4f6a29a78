//! Foreign table option normalisation and validation.
//!
//! Option keys are upper-cased on ingest; values of keys in
//! [`UPPER_CASE_OPTIONS`] are upper-cased too, so later comparisons are
//! case-exact.

use std::collections::BTreeMap;

use strata_result::{Error, Result};
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

pub type OptionsMap = BTreeMap<String, String>;

// Table option keys.
pub const FILE_PATH_KEY: &str = "FILE_PATH";
pub const FRAGMENT_SIZE_KEY: &str = "FRAGMENT_SIZE";
pub const REFRESH_TIMING_TYPE_KEY: &str = "REFRESH_TIMING_TYPE";
pub const REFRESH_START_DATE_TIME_KEY: &str = "REFRESH_START_DATE_TIME";
pub const REFRESH_INTERVAL_KEY: &str = "REFRESH_INTERVAL";
pub const REFRESH_UPDATE_TYPE_KEY: &str = "REFRESH_UPDATE_TYPE";

// Option values.
pub const ALL_REFRESH_UPDATE_TYPE: &str = "ALL";
pub const APPEND_REFRESH_UPDATE_TYPE: &str = "APPEND";
pub const SCHEDULE_REFRESH_TIMING_TYPE: &str = "SCHEDULED";
pub const MANUAL_REFRESH_TIMING_TYPE: &str = "MANUAL";

// Server option keys and values.
pub const STORAGE_TYPE_KEY: &str = "STORAGE_TYPE";
pub const BASE_PATH_KEY: &str = "BASE_PATH";
pub const LOCAL_FILE_STORAGE_TYPE: &str = "LOCAL_FILE";

const SUPPORTED_OPTIONS: [&str; 6] = [
    FILE_PATH_KEY,
    FRAGMENT_SIZE_KEY,
    REFRESH_TIMING_TYPE_KEY,
    REFRESH_START_DATE_TIME_KEY,
    REFRESH_INTERVAL_KEY,
    REFRESH_UPDATE_TYPE_KEY,
];

const UPPER_CASE_OPTIONS: [&str; 4] = [
    REFRESH_TIMING_TYPE_KEY,
    REFRESH_START_DATE_TIME_KEY,
    REFRESH_INTERVAL_KEY,
    REFRESH_UPDATE_TYPE_KEY,
];

// Not all options can be changed after creation.
const ALTERABLE_OPTIONS: [&str; 4] = [
    REFRESH_TIMING_TYPE_KEY,
    REFRESH_START_DATE_TIME_KEY,
    REFRESH_INTERVAL_KEY,
    REFRESH_UPDATE_TYPE_KEY,
];

/// Build a normalised options map from raw key/value pairs.
pub fn create_options_map<I>(raw: I) -> OptionsMap
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut map = OptionsMap::new();
    for (key, value) in raw {
        let key = key.to_uppercase();
        let value = if UPPER_CASE_OPTIONS.contains(&key.as_str()) {
            value.to_uppercase()
        } else {
            value
        };
        map.insert(key, value);
    }
    map
}

/// Reject any option key that neither the common set nor the wrapper's own
/// set supports.
pub fn validate_supported_options(
    options: &OptionsMap,
    data_wrapper_options: &[&str],
) -> Result<()> {
    for key in options.keys() {
        if !SUPPORTED_OPTIONS.contains(&key.as_str())
            && !data_wrapper_options.contains(&key.as_str())
        {
            return Err(Error::InvalidArgumentError(format!(
                "Invalid foreign table option \"{key}\"."
            )));
        }
    }
    Ok(())
}

/// Reject alteration of any option outside the alterable subset.
pub fn validate_alter_options(options: &OptionsMap) -> Result<()> {
    for key in options.keys() {
        if !ALTERABLE_OPTIONS.contains(&key.as_str()) {
            return Err(Error::InvalidArgumentError(format!(
                "Altering foreign table option \"{key}\" is not currently supported."
            )));
        }
    }
    Ok(())
}

/// Validate the refresh configuration against the rules of the refresh
/// option table, using `now` as the reference clock.
pub fn validate_refresh_options(options: &OptionsMap, now: OffsetDateTime) -> Result<()> {
    let update_type = options
        .get(REFRESH_UPDATE_TYPE_KEY)
        .map(String::as_str)
        .unwrap_or(ALL_REFRESH_UPDATE_TYPE);
    if update_type != ALL_REFRESH_UPDATE_TYPE && update_type != APPEND_REFRESH_UPDATE_TYPE {
        return Err(Error::InvalidArgumentError(format!(
            "Invalid value \"{update_type}\" for {REFRESH_UPDATE_TYPE_KEY} option. \
             Value must be \"{APPEND_REFRESH_UPDATE_TYPE}\" or \"{ALL_REFRESH_UPDATE_TYPE}\"."
        )));
    }

    let timing_type = options
        .get(REFRESH_TIMING_TYPE_KEY)
        .map(String::as_str)
        .unwrap_or(MANUAL_REFRESH_TIMING_TYPE);
    if timing_type == SCHEDULE_REFRESH_TIMING_TYPE {
        let Some(start) = options.get(REFRESH_START_DATE_TIME_KEY) else {
            return Err(Error::InvalidArgumentError(format!(
                "{} option must be provided for scheduled refreshes.",
                REFRESH_START_DATE_TIME_KEY.to_lowercase()
            )));
        };
        let start_time = parse_datetime(start)?;
        if start_time < now {
            return Err(Error::InvalidArgumentError(format!(
                "{} cannot be a past date time.",
                REFRESH_START_DATE_TIME_KEY.to_lowercase()
            )));
        }
        if let Some(interval) = options.get(REFRESH_INTERVAL_KEY) {
            if parse_interval(interval).is_none() {
                return Err(Error::InvalidArgumentError(format!(
                    "Invalid value provided for the {REFRESH_INTERVAL_KEY} option."
                )));
            }
        }
    } else if timing_type != MANUAL_REFRESH_TIMING_TYPE {
        return Err(Error::InvalidArgumentError(format!(
            "Invalid value provided for the {REFRESH_TIMING_TYPE_KEY} option. \
             Value must be \"{MANUAL_REFRESH_TIMING_TYPE}\" or \
             \"{SCHEDULE_REFRESH_TIMING_TYPE}\"."
        )));
    }
    Ok(())
}

/// Parse an ISO-8601-style timestamp; a `T` date/time separator is accepted
/// in place of a space. The result is interpreted as UTC.
pub fn parse_datetime(raw: &str) -> Result<OffsetDateTime> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let normalized = raw.replace('T', " ");
    PrimitiveDateTime::parse(&normalized, format)
        .map(|dt| dt.assume_utc())
        .map_err(|e| Error::InvalidArgumentError(format!("Invalid timestamp \"{raw}\": {e}")))
}

/// Compute the first scheduled refresh strictly after `now`, stepping the
/// interval from the configured start time. Returns `None` for manual
/// refresh timing or when no interval was configured and the start time has
/// passed.
pub fn next_refresh_time(options: &OptionsMap, now: OffsetDateTime) -> Result<Option<OffsetDateTime>> {
    let timing_type = options
        .get(REFRESH_TIMING_TYPE_KEY)
        .map(String::as_str)
        .unwrap_or(MANUAL_REFRESH_TIMING_TYPE);
    if timing_type != SCHEDULE_REFRESH_TIMING_TYPE {
        return Ok(None);
    }
    let Some(start) = options.get(REFRESH_START_DATE_TIME_KEY) else {
        return Ok(None);
    };
    let mut next = parse_datetime(start)?;
    let interval = options
        .get(REFRESH_INTERVAL_KEY)
        .and_then(|raw| parse_interval(raw));
    if next > now {
        return Ok(Some(next));
    }
    let Some(step) = interval else {
        return Ok(None);
    };
    while next <= now {
        next += step;
    }
    Ok(Some(next))
}

/// `^\d+[SHD]$`, case-insensitive: a count of seconds, hours, or days.
fn parse_interval(raw: &str) -> Option<Duration> {
    if raw.len() < 2 {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let count: i64 = digits.parse().ok()?;
    match unit.bytes().next()?.to_ascii_uppercase() {
        b'S' => Some(Duration::seconds(count)),
        b'H' => Some(Duration::hours(count)),
        b'D' => Some(Duration::days(count)),
        _ => None,
    }
}
