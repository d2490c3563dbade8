//! Abstract current-time source.
//!
//! Every timestamp the job queue writes comes from a [`Clock`] rather than
//! calling `Utc::now()` directly, so that tests can make time deterministic.
//! Grounded on the original implementation's `ctxclock` package: a real clock
//! for production, and static/error/stacked/scripted variants for tests.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RuntimeError;

/// A source of the current time.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Return the current time, or an error if none is available.
    async fn now(&self) -> Result<DateTime<Utc>, RuntimeError>;
}

/// The system clock. Never errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    async fn now(&self) -> Result<DateTime<Utc>, RuntimeError> {
        Ok(Utc::now())
    }
}

/// A clock that always returns the same fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct StaticClock(pub DateTime<Utc>);

#[async_trait]
impl Clock for StaticClock {
    async fn now(&self) -> Result<DateTime<Utc>, RuntimeError> {
        Ok(self.0)
    }
}

/// A clock that always fails. Useful for fault injection in tests.
pub struct ErrorClock(pub RuntimeError);

impl std::fmt::Debug for ErrorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ErrorClock").field(&self.0.to_string()).finish()
    }
}

#[async_trait]
impl Clock for ErrorClock {
    async fn now(&self) -> Result<DateTime<Utc>, RuntimeError> {
        Err(RuntimeError::NotConfigured("error clock always fails"))
    }
}

/// Tries each sub-clock in order, returning the first value produced.
///
/// The original's `stackedClock` inspects every entry but (by construction of
/// its loop) always returns on the first iteration; we preserve that
/// behavior rather than "fixing" it, since the surrounding code never relies
/// on falling through to a second clock.
pub struct StackedClock {
    clocks: Vec<Box<dyn Clock>>,
}

impl StackedClock {
    pub fn new(clocks: Vec<Box<dyn Clock>>) -> Self {
        Self { clocks }
    }
}

#[async_trait]
impl Clock for StackedClock {
    async fn now(&self) -> Result<DateTime<Utc>, RuntimeError> {
        if let Some(first) = self.clocks.first() {
            return first.now().await;
        }

        Err(RuntimeError::StackExhausted("no clocks configured".into()))
    }
}

/// One scripted result: either a timestamp or an error to return.
#[derive(Debug, Clone)]
pub struct ScriptedResult {
    pub time: DateTime<Utc>,
    pub error: Option<String>,
}

impl From<DateTime<Utc>> for ScriptedResult {
    fn from(time: DateTime<Utc>) -> Self {
        ScriptedResult { time, error: None }
    }
}

/// Dequeues results from a predefined list, guarded by a read-write lock, so
/// that every timestamp a test observes is deterministic. Running out of
/// scripted results yields [`RuntimeError::NoTimesLeft`].
pub struct ScriptedClock {
    results: RwLock<(Vec<ScriptedResult>, usize)>,
}

impl ScriptedClock {
    pub fn new(results: Vec<ScriptedResult>) -> Self {
        Self {
            results: RwLock::new((results, 0)),
        }
    }
}

#[async_trait]
impl Clock for ScriptedClock {
    async fn now(&self) -> Result<DateTime<Utc>, RuntimeError> {
        {
            let guard = self.results.read().expect("scripted clock lock poisoned");
            if guard.1 >= guard.0.len() {
                return Err(RuntimeError::NoTimesLeft);
            }
        }

        let mut guard = self.results.write().expect("scripted clock lock poisoned");
        if guard.1 >= guard.0.len() {
            return Err(RuntimeError::NoTimesLeft);
        }

        let index = guard.1;
        guard.1 += 1;
        let result = guard.0[index].clone();

        match result.error {
            Some(message) => Err(RuntimeError::StackExhausted(message)),
            None => Ok(result.time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn real_clock_never_errors() {
        assert!(RealClock.now().await.is_ok());
    }

    #[tokio::test]
    async fn static_clock_is_fixed() {
        let c = StaticClock(at(100));
        assert_eq!(c.now().await.unwrap(), at(100));
        assert_eq!(c.now().await.unwrap(), at(100));
    }

    #[tokio::test]
    async fn scripted_clock_dequeues_in_order() {
        let c = ScriptedClock::new(vec![at(1).into(), at(2).into()]);
        assert_eq!(c.now().await.unwrap(), at(1));
        assert_eq!(c.now().await.unwrap(), at(2));
        assert!(matches!(c.now().await, Err(RuntimeError::NoTimesLeft)));
    }

    #[tokio::test]
    async fn stacked_clock_returns_first() {
        let c = StackedClock::new(vec![Box::new(StaticClock(at(5))), Box::new(StaticClock(at(9)))]);
        assert_eq!(c.now().await.unwrap(), at(5));
    }
}
