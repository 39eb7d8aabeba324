//! Core model types: lock identity, family context, descriptors, config

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use relock_common::now_epoch_seconds;

/// Where a lock's state lives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// In-process lock, state held in memory
    Local,
    /// Store-backed lock, state held as a row in the backing store
    Distributed,
}

impl LockType {
    pub fn is_local(&self) -> bool {
        matches!(self, LockType::Local)
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, LockType::Distributed)
    }
}

impl Display for LockType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LockType::Local => write!(f, "Local"),
            LockType::Distributed => write!(f, "Distributed"),
        }
    }
}

/// Execution discipline a lock is used under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Thread-blocking acquisition
    Blocking,
    /// Suspend-on-acquire acquisition, no thread parked while waiting
    Cooperative,
}

impl LockMode {
    pub fn is_blocking(&self) -> bool {
        matches!(self, LockMode::Blocking)
    }

    pub fn is_cooperative(&self) -> bool {
        matches!(self, LockMode::Cooperative)
    }
}

impl Display for LockMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Blocking => write!(f, "Blocking"),
            LockMode::Cooperative => write!(f, "Cooperative"),
        }
    }
}

/// Immutable descriptor of a lock family, created once at registry bootstrap
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockContext {
    pub factory_name: String,
    pub cleanable: bool,
    pub debug_enabled: bool,
    /// Unix seconds at family creation
    pub created_at: i64,
}

impl LockContext {
    pub fn new(factory_name: impl Into<String>, cleanable: bool, debug_enabled: bool) -> Self {
        Self {
            factory_name: factory_name.into(),
            cleanable,
            debug_enabled,
            created_at: now_epoch_seconds(),
        }
    }

    /// Whether the family is older than `max_age`
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at < now_epoch_seconds() - max_age.as_secs() as i64
    }
}

/// Ephemeral, per-invocation description of which lock to use and how long
/// to wait for it. The sole input the descriptor dispatch requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockDescriptor {
    pub name: String,
    pub wait_for: Duration,
    pub lock_type: LockType,
    pub lock_mode: LockMode,
}

impl LockDescriptor {
    pub fn new(
        name: impl Into<String>,
        wait_for: Duration,
        lock_type: LockType,
        lock_mode: LockMode,
    ) -> Self {
        Self {
            name: name.into(),
            wait_for,
            lock_type,
            lock_mode,
        }
    }

    /// Descriptor used to address a family for cleanup, no name or wait
    pub fn for_clean(lock_type: LockType, lock_mode: LockMode) -> Self {
        Self::new("", Duration::ZERO, lock_type, lock_mode)
    }

    /// A zero wait means a single try; anything else is obtain-with-timeout
    pub fn has_wait(&self) -> bool {
        !self.wait_for.is_zero()
    }
}

/// Point-in-time snapshot of one locker, for introspection
#[derive(Clone, Debug, Serialize)]
pub struct LockerInfo {
    pub name: String,
    pub lock_type: LockType,
    pub lock_mode: LockMode,
    /// Unix seconds of the last acquisition, 0 if never acquired
    pub locked_at: i64,
    pub locked: bool,
}

/// Runtime configuration for the lock engines and the cleanup sweep
#[derive(Clone, Debug)]
pub struct LocksConfig {
    pub enabled: bool,
    pub debug_enabled: bool,
    /// Hard ceiling on assumed maximum critical-section duration; locks and
    /// families older than this are reclaimed by the sweep
    pub max_age: Duration,
    pub cleanup_interval: Duration,
    /// Warm-up delay before the first sweep
    pub initial_delay: Duration,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_enabled: true,
            max_age: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(4 * 60),
            initial_delay: Duration::from_secs(10 * 60),
        }
    }
}

impl LocksConfig {
    /// Read configuration from a `config::Config`, falling back to defaults
    /// for missing keys
    pub fn from_config(config: &config::Config) -> Self {
        let defaults = Self::default();
        Self {
            enabled: config.get_bool("relock.enabled").unwrap_or(defaults.enabled),
            debug_enabled: config
                .get_bool("relock.debug-enabled")
                .unwrap_or(defaults.debug_enabled),
            max_age: config
                .get_int("relock.max-age-seconds")
                .map(|s| Duration::from_secs(s.max(0) as u64))
                .unwrap_or(defaults.max_age),
            cleanup_interval: config
                .get_int("relock.cleanup-interval-seconds")
                .map(|s| Duration::from_secs(s.max(0) as u64))
                .unwrap_or(defaults.cleanup_interval),
            initial_delay: config
                .get_int("relock.initial-delay-seconds")
                .map(|s| Duration::from_secs(s.max(0) as u64))
                .unwrap_or(defaults.initial_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_type_and_mode_helpers() {
        assert!(LockType::Local.is_local());
        assert!(LockType::Distributed.is_distributed());
        assert!(LockMode::Blocking.is_blocking());
        assert!(LockMode::Cooperative.is_cooperative());
        assert_eq!(LockType::Distributed.to_string(), "Distributed");
        assert_eq!(LockMode::Cooperative.to_string(), "Cooperative");
    }

    #[test]
    fn test_lock_context_expiry() {
        let context = LockContext::new("family", true, false);
        assert!(!context.is_expired(Duration::from_secs(60)));

        let old = LockContext {
            created_at: now_epoch_seconds() - 120,
            ..context
        };
        assert!(old.is_expired(Duration::from_secs(60)));
        assert!(!old.is_expired(Duration::from_secs(600)));
    }

    #[test]
    fn test_descriptor_wait() {
        let descriptor = LockDescriptor::new(
            "alpha",
            Duration::ZERO,
            LockType::Local,
            LockMode::Blocking,
        );
        assert!(!descriptor.has_wait());

        let descriptor = LockDescriptor::new(
            "alpha",
            Duration::from_millis(200),
            LockType::Local,
            LockMode::Blocking,
        );
        assert!(descriptor.has_wait());

        let clean = LockDescriptor::for_clean(LockType::Distributed, LockMode::Cooperative);
        assert!(clean.name.is_empty());
        assert!(!clean.has_wait());
    }

    #[test]
    fn test_config_defaults() {
        let config = LocksConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_age, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Duration::from_secs(240));
    }

    #[test]
    fn test_config_from_config() {
        let raw = config::Config::builder()
            .set_override("relock.max-age-seconds", 30)
            .unwrap()
            .set_override("relock.debug-enabled", false)
            .unwrap()
            .build()
            .unwrap();

        let config = LocksConfig::from_config(&raw);
        assert_eq!(config.max_age, Duration::from_secs(30));
        assert!(!config.debug_enabled);
        // Unset keys fall back to defaults
        assert_eq!(config.cleanup_interval, Duration::from_secs(240));
    }
}
