use std::time::Duration;

use serde::{Deserialize, Serialize};
use shoal_types::NodeId;

use crate::error::{ClusterError, ClusterResult};

/// Cluster driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Root znode the driver lives under. A deployment constant: every node
    /// of one cluster must use the same base.
    pub base: String,
    /// Requested coordination session timeout in milliseconds.
    pub session_timeout_ms: u64,
    /// Upper bound on cluster size; also sizes the leave side-channel.
    pub member_cap: usize,
    /// How long to wait for a freshly admitted member's znode to appear,
    /// in milliseconds.
    pub member_create_timeout_ms: u64,
    /// Polling step for the wait above, in milliseconds.
    pub member_create_interval_ms: u64,
    /// Delay between retries of transient coordination errors,
    /// in milliseconds.
    pub retry_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base: "/shoal".to_string(),
            session_timeout_ms: 30_000,
            member_cap: 1024,
            member_create_timeout_ms: 30_000, // matches the session timeout
            member_create_interval_ms: 10,
            retry_interval_ms: 10,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> ClusterResult<()> {
        if !self.base.starts_with('/') || self.base.len() < 2 || self.base.ends_with('/') {
            return Err(ClusterError::Configuration(format!(
                "base must be an absolute znode path without a trailing slash: {:?}",
                self.base
            )));
        }
        if self.member_cap == 0 {
            return Err(ClusterError::Configuration(
                "member_cap must be nonzero".to_string(),
            ));
        }
        if self.member_create_interval_ms == 0 {
            return Err(ClusterError::Configuration(
                "member_create_interval_ms must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn queue_dir(&self) -> String {
        format!("{}/queue", self.base)
    }

    pub fn member_dir(&self) -> String {
        format!("{}/member", self.base)
    }

    pub fn member_path(&self, node: &NodeId) -> String {
        format!("{}/member/{}", self.base, node)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn member_create_interval(&self) -> Duration {
        Duration::from_millis(self.member_create_interval_ms)
    }

    pub(crate) fn member_create_attempts(&self) -> u64 {
        self.member_create_timeout_ms / self.member_create_interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClusterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base, "/shoal");
        assert_eq!(config.member_cap, 1024);
        assert_eq!(config.member_create_attempts(), 3000);
    }

    #[test]
    fn paths_follow_the_layout() {
        let config = ClusterConfig::default();
        let node = NodeId::new("10.0.0.1:7000").unwrap();
        assert_eq!(config.queue_dir(), "/shoal/queue");
        assert_eq!(config.member_dir(), "/shoal/member");
        assert_eq!(config.member_path(&node), "/shoal/member/10.0.0.1:7000");
    }

    #[test]
    fn bad_base_rejected() {
        for base in ["", "shoal", "/", "/shoal/"] {
            let config = ClusterConfig {
                base: base.to_string(),
                ..ClusterConfig::default()
            };
            assert!(config.validate().is_err(), "base {base:?} accepted");
        }
    }

    #[test]
    fn zero_member_cap_rejected() {
        let config = ClusterConfig {
            member_cap: 0,
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
