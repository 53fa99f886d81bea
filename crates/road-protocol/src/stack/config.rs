use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{AutoMode, Kind, Uid};

/// Retry and timeout policy for transactions.
///
/// A transaction resends its last packet every `redo_interval` (at most
/// `max_redos` times) and is discarded once its kind's timeout elapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionPolicy {
    #[serde(with = "millis")]
    pub join_timeout: Duration,
    #[serde(with = "millis")]
    pub allow_timeout: Duration,
    #[serde(with = "millis")]
    pub alive_timeout: Duration,
    #[serde(with = "millis")]
    pub redo_interval: Duration,
    pub max_redos: u32,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(2),
            allow_timeout: Duration::from_secs(2),
            alive_timeout: Duration::from_secs(2),
            redo_interval: Duration::from_millis(500),
            max_redos: 4,
        }
    }
}

impl TransactionPolicy {
    pub fn timeout(&self, kind: Kind) -> Duration {
        match kind {
            Kind::Join => self.join_timeout,
            Kind::Allow => self.allow_timeout,
            Kind::Alive => self.alive_timeout,
        }
    }
}

/// Presence schedule shared by remotes that do not override it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresencePolicy {
    #[serde(with = "millis")]
    pub period: Duration,
    #[serde(with = "millis")]
    pub offset: Duration,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            offset: Duration::from_millis(500),
        }
    }
}

/// Configuration for a [`RoadStack`](crate::RoadStack).
///
/// `name`, `uid`, `main` and `auto` only seed a brand-new local estate;
/// a stack opened on a populated keep keeps what the keep says.
///
/// ```rust
/// use std::time::Duration;
/// use road_protocol::{AutoMode, StackConfig};
///
/// let config = StackConfig::new("main")
///     .main(true)
///     .auto(AutoMode::Once)
///     .presence(Duration::from_secs(1), Duration::from_millis(500));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub name: String,
    pub uid: Uid,
    pub main: bool,
    pub auto: AutoMode,
    pub timeouts: TransactionPolicy,
    pub presence: PresencePolicy,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "road".to_string(),
            uid: 0,
            main: false,
            auto: AutoMode::Never,
            timeouts: TransactionPolicy::default(),
            presence: PresencePolicy::default(),
        }
    }
}

impl StackConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn uid(mut self, uid: Uid) -> Self {
        self.uid = uid;
        self
    }

    pub fn main(mut self, main: bool) -> Self {
        self.main = main;
        self
    }

    pub fn auto(mut self, auto: AutoMode) -> Self {
        self.auto = auto;
        self
    }

    pub fn timeouts(mut self, timeouts: TransactionPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn presence(mut self, period: Duration, offset: Duration) -> Self {
        self.presence = PresencePolicy { period, offset };
        self
    }

    pub fn validate(&self) -> Result<(), crate::RoadError> {
        if self.name.is_empty() {
            return Err(crate::RoadError::InvalidConfig("name must not be empty".into()));
        }
        if self.timeouts.redo_interval.is_zero() {
            return Err(crate::RoadError::InvalidConfig(
                "redo_interval must be positive".into(),
            ));
        }
        for kind in [Kind::Join, Kind::Allow, Kind::Alive] {
            if self.timeouts.timeout(kind).is_zero() {
                return Err(crate::RoadError::InvalidConfig(format!(
                    "{kind} timeout must be positive"
                )));
            }
        }
        if self.presence.period.is_zero() {
            return Err(crate::RoadError::InvalidConfig(
                "presence period must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Durations as integer milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_presence_schedule() {
        let config = StackConfig::default();
        assert_eq!(config.presence.period, Duration::from_secs(1));
        assert_eq!(config.presence.offset, Duration::from_millis(500));
        assert_eq!(config.timeouts.timeout(Kind::Alive), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_redo_interval_rejected() {
        let mut policy = TransactionPolicy::default();
        policy.redo_interval = Duration::ZERO;
        let config = StackConfig::new("x").timeouts(policy);
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_name_rejected() {
        assert!(StackConfig::new("").validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_msgpack() {
        let config = StackConfig::new("main").main(true).auto(AutoMode::Always);
        let bytes = rmp_serde::to_vec_named(&config).unwrap();
        let decoded: StackConfig = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, config);
    }
}
