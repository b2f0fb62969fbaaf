//! Charm locators
//!
//! A charm is identified by a URL-like locator of the form
//! `schema:[~user/][series/]name[-revision]`, for example
//! `local:trusty/magic` or `cs:~bob/xenial/postgresql-42`.

use crate::error::{DescriptionError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]*[a-z][a-z0-9]*)*$").expect("name pattern is valid")
    })
}

fn series_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z]+[a-z0-9]*$").expect("series pattern is valid"))
}

fn user_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-zA-Z0-9+.\-]+$").expect("user pattern is valid")
    })
}

/// Where a charm archive originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Schema {
    /// Uploaded directly to the controller
    Local,
    /// Published in the charm store
    CharmStore,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Local => "local",
            Schema::CharmStore => "cs",
        }
    }
}

/// Locator for a charm archive
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharmUrl {
    pub schema: Schema,
    pub user: Option<String>,
    pub series: Option<String>,
    pub name: String,
    pub revision: Option<u32>,
}

impl CharmUrl {
    /// Create a local charm locator
    pub fn local(series: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Schema::Local,
            user: None,
            series: Some(series.into()),
            name: name.into(),
            revision: None,
        }
    }

    /// Return a copy pinned to the given revision
    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = Some(revision);
        self
    }
}

impl fmt::Display for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.schema.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "~{}/", user)?;
        }
        if let Some(series) = &self.series {
            write!(f, "{}/", series)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(revision) = self.revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

impl FromStr for CharmUrl {
    type Err = DescriptionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| DescriptionError::InvalidCharmUrl {
            url: s.to_string(),
            reason: reason.to_string(),
        };

        let (schema, rest) = s.split_once(':').ok_or_else(|| invalid("missing schema"))?;
        let schema = match schema {
            "local" => Schema::Local,
            "cs" => Schema::CharmStore,
            _ => return Err(invalid("schema must be \"local\" or \"cs\"")),
        };

        let mut parts: Vec<&str> = rest.split('/').collect();
        let user = match parts.first() {
            Some(first) if first.starts_with('~') => {
                if schema == Schema::Local {
                    return Err(invalid("local charms cannot have a user"));
                }
                let user = &first[1..];
                if !user_pattern().is_match(user) {
                    return Err(invalid("invalid user"));
                }
                parts.remove(0);
                Some(user.to_string())
            }
            _ => None,
        };

        let (series, name_rev) = match parts.as_slice() {
            [name] => (None, *name),
            [series, name] => {
                if !series_pattern().is_match(series) {
                    return Err(invalid("invalid series"));
                }
                (Some(series.to_string()), *name)
            }
            _ => return Err(invalid("too many path segments")),
        };

        let (name, revision) = match name_rev.rsplit_once('-') {
            Some((name, rev)) if !rev.is_empty() && rev.chars().all(|c| c.is_ascii_digit()) => {
                let revision = rev.parse().map_err(|_| invalid("invalid revision"))?;
                (name, Some(revision))
            }
            _ => (name_rev, None),
        };
        if !name_pattern().is_match(name) {
            return Err(invalid("invalid name"));
        }

        Ok(Self {
            schema,
            user,
            series,
            name: name.to_string(),
            revision,
        })
    }
}

impl Serialize for CharmUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CharmUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local() {
        let url: CharmUrl = "local:trusty/magic".parse().unwrap();
        assert_eq!(url, CharmUrl::local("trusty", "magic"));
        assert_eq!(url.to_string(), "local:trusty/magic");
    }

    #[test]
    fn test_parse_store_with_revision() {
        let url: CharmUrl = "cs:trusty/postgresql-42".parse().unwrap();
        assert_eq!(url.schema, Schema::CharmStore);
        assert_eq!(url.name, "postgresql");
        assert_eq!(url.revision, Some(42));
        assert_eq!(url.to_string(), "cs:trusty/postgresql-42");
    }

    #[test]
    fn test_parse_user_namespace() {
        let url: CharmUrl = "cs:~bob/xenial/wiki-scale-3".parse().unwrap();
        assert_eq!(url.user.as_deref(), Some("bob"));
        assert_eq!(url.name, "wiki-scale");
        assert_eq!(url.revision, Some(3));
    }

    #[test]
    fn test_series_is_optional() {
        let url: CharmUrl = "cs:mysql".parse().unwrap();
        assert!(url.series.is_none());
        assert!(url.revision.is_none());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["magic", "http:trusty/magic", "local:~bob/trusty/magic", "cs:a/b/c/d", "cs:trusty/Magic"] {
            assert!(bad.parse::<CharmUrl>().is_err(), "{bad:?} should not parse");
        }
    }
}
