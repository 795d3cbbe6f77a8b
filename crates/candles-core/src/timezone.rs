use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::CandleError;

/// Fixed offset of the exchange's home timezone (KST, no DST).
pub const KST_OFFSET_HOURS: i64 = 9;

const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const UTC_BOUNDARY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Zone a caller-supplied boundary timestamp is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceZone {
    /// Exchange-local time: `YYYY-MM-DDTHH:mm:ss`
    #[default]
    Kst,
    /// Already a UTC boundary: `YYYY-MM-DDTHH:mm:ssZ`
    Utc,
}

impl fmt::Display for SourceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceZone::Kst => f.write_str("KST"),
            SourceZone::Utc => f.write_str("UTC"),
        }
    }
}

impl FromStr for SourceZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "KST" => Ok(SourceZone::Kst),
            "UTC" => Ok(SourceZone::Utc),
            other => Err(format!("unknown timezone: {other}. Expected: KST, UTC")),
        }
    }
}

/// Convert a caller boundary into the `to` value the exchange expects.
///
/// KST input is shifted back nine hours and rendered as `YYYY-MM-DDTHH:mm:ssZ`.
/// UTC input is returned untouched.
pub fn to_utc_boundary(local: &str, zone: SourceZone) -> Result<String, CandleError> {
    match zone {
        SourceZone::Kst => Ok(format_utc_boundary(kst_to_utc(parse_local(local)?))),
        SourceZone::Utc => Ok(local.to_string()),
    }
}

/// Strictly parse an exchange-local timestamp (`YYYY-MM-DDTHH:mm:ss`).
pub fn parse_local(s: &str) -> Result<NaiveDateTime, CandleError> {
    if !has_shape(s, false) {
        return Err(invalid(s, "YYYY-MM-DDTHH:mm:ss"));
    }
    NaiveDateTime::parse_from_str(s, LOCAL_FORMAT).map_err(|_| invalid(s, "YYYY-MM-DDTHH:mm:ss"))
}

/// Parse a caller boundary into exchange-local time, whatever zone it was given in.
pub fn parse_boundary(s: &str, zone: SourceZone) -> Result<NaiveDateTime, CandleError> {
    match zone {
        SourceZone::Kst => parse_local(s),
        SourceZone::Utc => {
            if !has_shape(s, true) {
                return Err(invalid(s, "YYYY-MM-DDTHH:mm:ssZ"));
            }
            let utc = NaiveDateTime::parse_from_str(s, UTC_BOUNDARY_FORMAT)
                .map_err(|_| invalid(s, "YYYY-MM-DDTHH:mm:ssZ"))?;
            Ok(utc_to_kst(utc))
        }
    }
}

pub fn kst_to_utc(kst: NaiveDateTime) -> NaiveDateTime {
    kst - Duration::hours(KST_OFFSET_HOURS)
}

pub fn utc_to_kst(utc: NaiveDateTime) -> NaiveDateTime {
    utc + Duration::hours(KST_OFFSET_HOURS)
}

pub fn format_utc_boundary(utc: NaiveDateTime) -> String {
    utc.format(UTC_BOUNDARY_FORMAT).to_string()
}

/// chrono accepts unpadded fields, so the fixed-width layout is checked up front.
fn has_shape(s: &str, zulu: bool) -> bool {
    let bytes = s.as_bytes();
    let expected_len = if zulu { 20 } else { 19 };
    if bytes.len() != expected_len {
        return false;
    }
    if zulu && bytes[19] != b'Z' {
        return false;
    }
    bytes[..19].iter().enumerate().all(|(i, &b)| match i {
        4 | 7 => b == b'-',
        10 => b == b'T',
        13 | 16 => b == b':',
        _ => b.is_ascii_digit(),
    })
}

fn invalid(value: &str, expected: &'static str) -> CandleError {
    CandleError::InvalidTimestamp {
        value: value.to_string(),
        expected,
    }
}
