//! Ambient configuration the core reads. Grounded on `internal/config/config.go`;
//! everything outside `background_workers` and `log_queries` (addresses,
//! paths, log levels) belongs to the outer binary, not the core.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Observability-only query logging setting. Never changes queue semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogQueries {
    #[default]
    None,
    All,
    SlowerThan(Duration),
}

impl fmt::Display for LogQueries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogQueries::None => write!(f, "none"),
            LogQueries::All => write!(f, "all"),
            LogQueries::SlowerThan(d) => write!(f, ">{}ms", d.as_millis()),
        }
    }
}

impl std::str::FromStr for LogQueries {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(LogQueries::None),
            "all" => Ok(LogQueries::All),
            rest if rest.starts_with('>') && rest.len() > 1 => {
                let millis: u64 = rest[1..]
                    .trim_end_matches("ms")
                    .parse()
                    .map_err(|_| format!("could not parse duration from {rest:?}"))?;
                Ok(LogQueries::SlowerThan(Duration::from_millis(millis)))
            }
            other => Err(format!(
                "unrecognised input {other:?}; valid options are none, all, or >Xms"
            )),
        }
    }
}

impl Serialize for LogQueries {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LogQueries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Configuration recognized by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many background worker loops to start.
    pub background_workers: u32,
    /// Observability-only query logging setting.
    pub log_queries: LogQueries,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            background_workers: 1,
            log_queries: LogQueries::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_none_all_and_threshold() {
        assert_eq!("none".parse::<LogQueries>().unwrap(), LogQueries::None);
        assert_eq!("".parse::<LogQueries>().unwrap(), LogQueries::None);
        assert_eq!("all".parse::<LogQueries>().unwrap(), LogQueries::All);
        assert_eq!(
            ">500ms".parse::<LogQueries>().unwrap(),
            LogQueries::SlowerThan(Duration::from_millis(500))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("garbage".parse::<LogQueries>().is_err());
        assert!(">".parse::<LogQueries>().is_err());
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.background_workers, 1);
        assert_eq!(config.log_queries, LogQueries::None);
    }
}
