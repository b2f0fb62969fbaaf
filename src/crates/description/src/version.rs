//! Agent binary versions
//!
//! Agent tools are identified by a version number plus the series and
//! architecture they were built for, printed as `2.0.1-trusty-amd64`. The
//! identity is opaque to the description: it is only ever used as a lookup
//! key when binaries are copied between controllers.

use crate::error::{DescriptionError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,9})\.(\d{1,9})(?:\.|-([a-z]+))(\d{1,9})(?:\.(\d{1,9}))?$")
            .expect("version pattern is valid")
    })
}

/// A version number such as `2.0.1`, `2.1-beta1` or `2.0.1.3`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Number {
    pub major: u32,
    pub minor: u32,
    /// Pre-release tag (`beta`, `alpha`, ...); empty for releases
    pub tag: String,
    pub patch: u32,
    pub build: u32,
}

impl Number {
    /// Create a release version number
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            tag: String::new(),
            patch,
            build: 0,
        }
    }

    /// True for development builds (tagged or with a build number)
    pub fn is_dev(&self) -> bool {
        !self.tag.is_empty() || self.build > 0
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then_with(|| match (self.tag.is_empty(), other.tag.is_empty()) {
                // A release sorts after every pre-release of the same minor.
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => self.tag.cmp(&other.tag),
            })
            .then(self.patch.cmp(&other.patch))
            .then(self.build.cmp(&other.build))
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        } else {
            write!(f, "{}.{}-{}{}", self.major, self.minor, self.tag, self.patch)?;
        }
        if self.build > 0 {
            write!(f, ".{}", self.build)?;
        }
        Ok(())
    }
}

impl FromStr for Number {
    type Err = DescriptionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DescriptionError::InvalidVersion(s.to_string());
        let caps = number_pattern().captures(s).ok_or_else(invalid)?;
        let field = |i: usize| -> Result<u32> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().map_err(|_| invalid()),
                None => Ok(0),
            }
        };

        Ok(Self {
            major: field(1)?,
            minor: field(2)?,
            tag: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
            patch: field(4)?,
            build: field(5)?,
        })
    }
}

/// A version number bound to the series and architecture of a build
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Binary {
    pub number: Number,
    pub series: String,
    pub arch: String,
}

impl Binary {
    pub fn new(number: Number, series: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            number,
            series: series.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.number, self.series, self.arch)
    }
}

impl FromStr for Binary {
    type Err = DescriptionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DescriptionError::InvalidVersion(s.to_string());
        let mut parts = s.rsplitn(3, '-');
        let arch = parts.next().ok_or_else(invalid)?;
        let series = parts.next().ok_or_else(invalid)?;
        let number = parts.next().ok_or_else(invalid)?;

        let well_formed =
            |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric());
        if !well_formed(arch) || !well_formed(series) {
            return Err(invalid());
        }

        Ok(Self {
            number: number.parse().map_err(|_| invalid())?,
            series: series.to_string(),
            arch: arch.to_string(),
        })
    }
}

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
