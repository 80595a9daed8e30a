//! Expiration offsets.
//!
//! An offset is written as `<D>d-<H>h-<M>m-<S>s`, e.g. `1d-12h-0m-30s`.
//! Days are unbounded, hours are 0–23, minutes and seconds 0–59. The hour,
//! minute and second markers are case-insensitive; the day marker is not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// A relative expiration, measured from the moment a slice entry is seeded
/// or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExpireOffset {
    days: u64,
    hours: u8,
    minutes: u8,
    seconds: u8,
}

impl ExpireOffset {
    /// Builds an offset from its components, enforcing the same ranges as
    /// the textual format.
    pub fn new(days: u64, hours: u8, minutes: u8, seconds: u8) -> Result<Self, Error> {
        if hours > 23 || minutes > 59 || seconds > 59 {
            return Err(Error::InvalidExpire(format!(
                "{days}d-{hours}h-{minutes}m-{seconds}s"
            )));
        }
        Ok(Self {
            days,
            hours,
            minutes,
            seconds,
        })
    }

    #[must_use]
    pub const fn days(&self) -> u64 {
        self.days
    }

    #[must_use]
    pub const fn hours(&self) -> u8 {
        self.hours
    }

    #[must_use]
    pub const fn minutes(&self) -> u8 {
        self.minutes
    }

    #[must_use]
    pub const fn seconds(&self) -> u8 {
        self.seconds
    }

    /// Total length of the offset in milliseconds, saturating on overflow.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        let secs = u64::from(self.hours) * 3_600
            + u64::from(self.minutes) * 60
            + u64::from(self.seconds);
        self.days
            .saturating_mul(86_400)
            .saturating_add(secs)
            .saturating_mul(1_000)
    }

    /// The offset as a [`Duration`].
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}

/// Parses one `<digits><marker>` segment, allowing at most `max_digits`
/// digits (`None` for unbounded).
fn segment(part: &str, markers: &[char], max_digits: Option<usize>) -> Option<u64> {
    let marker = part.chars().last()?;
    if !markers.contains(&marker) {
        return None;
    }
    let digits = &part[..part.len() - marker.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if max_digits.is_some_and(|max| digits.len() > max) {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for ExpireOffset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidExpire(s.to_string());
        let parts: Vec<&str> = s.split('-').collect();
        let [d, h, m, sec] = parts.as_slice() else {
            return Err(invalid());
        };

        let days = segment(d, &['d'], None).ok_or_else(invalid)?;
        let hours = segment(h, &['h', 'H'], Some(2)).ok_or_else(invalid)?;
        let minutes = segment(m, &['m', 'M'], Some(2)).ok_or_else(invalid)?;
        let seconds = segment(sec, &['s', 'S'], Some(2)).ok_or_else(invalid)?;

        // Component ranges are already bounded to two digits above.
        Self::new(days, hours as u8, minutes as u8, seconds as u8).map_err(|_| invalid())
    }
}

impl fmt::Display for ExpireOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}d-{}h-{}m-{}s",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

impl TryFrom<String> for ExpireOffset {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExpireOffset> for String {
    fn from(offset: ExpireOffset) -> Self {
        offset.to_string()
    }
}
