//! Runtime configuration.
//!
//! All tunables live in one immutable [`Config`] built at startup and
//! passed into the server, replacing any process-wide mutable state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RelayError;

/// Default connect timeout for remote dials, in seconds.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 2;
/// Default idle timeout before a silent stream is closed, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 20;
/// Default cap on concurrently running pool tasks.
pub const DEFAULT_POOL_CAPACITY: usize = 2000;
/// Default relay copy buffer size (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;

/// Ordered remote target list.
///
/// The first entry is the primary: the only target whose responses are
/// relayed back to the client. Never empty once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    targets: Vec<String>,
}

impl TargetSet {
    pub fn new(targets: Vec<String>) -> Result<Self, RelayError> {
        if targets.is_empty() {
            return Err(RelayError::Config("remote target list is empty".into()));
        }
        if targets.iter().any(|t| t.trim().is_empty()) {
            return Err(RelayError::Config(
                "remote target list contains an empty entry".into(),
            ));
        }
        Ok(Self {
            targets: targets.into_iter().map(|t| t.trim().to_string()).collect(),
        })
    }

    pub fn primary(&self) -> &str {
        &self.targets[0]
    }

    pub fn secondaries(&self) -> &[String] {
        &self.targets[1..]
    }

    pub fn all(&self) -> &[String] {
        &self.targets
    }

    /// Whether more than one target was configured (fan-out mode).
    pub fn is_multi(&self) -> bool {
        self.targets.len() > 1
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl FromStr for TargetSet {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.split(',').map(str::to_string).collect())
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.targets.join(","))
    }
}

/// Immutable runtime configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind and accept client connections on.
    pub listen: String,
    /// Remote targets; the first is the primary.
    pub targets: TargetSet,
    /// Connect timeout for remote dials.
    pub dial_timeout: Duration,
    /// Per-stream idle timeout; a stream silent for this long is closed.
    pub idle_timeout: Duration,
    /// Hard cap on concurrently running pool tasks.
    pub pool_capacity: usize,
    /// Relay copy buffer size in bytes.
    pub relay_buffer_size: usize,
}

impl Config {
    /// Configuration with reference defaults for everything but addresses.
    pub fn new(listen: impl Into<String>, targets: TargetSet) -> Self {
        Self {
            listen: listen.into(),
            targets,
            dial_timeout: Duration::from_secs(DEFAULT_DIAL_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            relay_buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_target() {
        let set: TargetSet = "127.0.0.1:9100".parse().unwrap();
        assert_eq!(set.primary(), "127.0.0.1:9100");
        assert!(set.secondaries().is_empty());
        assert!(!set.is_multi());
    }

    #[test]
    fn parses_target_list_with_primary_first() {
        let set: TargetSet = "a:1, b:2 ,c:3".parse().unwrap();
        assert_eq!(set.primary(), "a:1");
        assert_eq!(set.secondaries(), &["b:2".to_string(), "c:3".to_string()]);
        assert!(set.is_multi());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn rejects_empty_entries() {
        assert!("".parse::<TargetSet>().is_err());
        assert!("a:1,,b:2".parse::<TargetSet>().is_err());
        assert!(TargetSet::new(Vec::new()).is_err());
    }

    #[test]
    fn display_round_trips() {
        let set: TargetSet = "a:1,b:2".parse().unwrap();
        assert_eq!(set.to_string(), "a:1,b:2");
    }
}
