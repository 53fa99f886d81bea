use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use road_transport::HostAddr;

/// Relationship id. Each stack allocates its own; zero is the vacuous placeholder.
pub type Uid = u32;

/// Placeholder far uid before a join has bound the relationship.
pub const VACUOUS_UID: Uid = 0;

/// Relationship flag: never attempted, confirmed, or explicitly failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Tristate {
    #[default]
    Unknown,
    True,
    False,
}

impl Tristate {
    pub fn is_true(self) -> bool {
        self == Tristate::True
    }

    /// `None` for unknown, as stored in the keep.
    pub fn to_option(self) -> Option<bool> {
        match self {
            Tristate::Unknown => None,
            Tristate::True => Some(true),
            Tristate::False => Some(false),
        }
    }

    pub fn from_option(value: Option<bool>) -> Self {
        match value {
            None => Tristate::Unknown,
            Some(true) => Tristate::True,
            Some(false) => Tristate::False,
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tristate::Unknown => "unknown",
            Tristate::True => "true",
            Tristate::False => "false",
        })
    }
}

/// How a main stack treats join requests from peers it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AutoMode {
    /// Reject unknown peers.
    #[default]
    Never,
    /// Accept one unknown peer, then behave as `Never`.
    Once,
    /// Accept every unknown peer, and key changes from known ones.
    Always,
}

impl AutoMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AutoMode::Never => "never",
            AutoMode::Once => "once",
            AutoMode::Always => "always",
        }
    }
}

impl fmt::Display for AutoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(AutoMode::Never),
            "once" => Ok(AutoMode::Once),
            "always" => Ok(AutoMode::Always),
            other => Err(format!("unknown auto mode: {other}")),
        }
    }
}

/// Transaction kind. Ordered along the chain Join → Allow → Alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Join,
    Allow,
    Alive,
}

impl Kind {
    /// Next stage in the chain, if any.
    pub fn next(self) -> Option<Kind> {
        match self {
            Kind::Join => Some(Kind::Allow),
            Kind::Allow => Some(Kind::Alive),
            Kind::Alive => None,
        }
    }

    /// Stage that must hold before this one can run.
    pub fn prerequisite(self) -> Option<Kind> {
        match self {
            Kind::Join => None,
            Kind::Allow => Some(Kind::Join),
            Kind::Alive => Some(Kind::Allow),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Join => "join",
            Kind::Allow => "allow",
            Kind::Alive => "alive",
        })
    }
}

/// Which side of an exchange a transaction plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Initiator,
    Correspondent,
}

/// Why a correspondent refused an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NackReason {
    /// Policy refusal: non-main stack, auto mode, key mismatch.
    Refused,
    /// The correspondent has no joined relationship with the sender.
    Unjoined,
    /// The correspondent has no session with the sender.
    Unallowed,
    /// A proof or payload failed verification.
    Invalid,
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NackReason::Refused => "refused",
            NackReason::Unjoined => "unjoined",
            NackReason::Unallowed => "unallowed",
            NackReason::Invalid => "invalid",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ordering_follows_chain() {
        assert!(Kind::Join < Kind::Allow);
        assert!(Kind::Allow < Kind::Alive);
        assert_eq!(Kind::Join.next(), Some(Kind::Allow));
        assert_eq!(Kind::Alive.next(), None);
        assert_eq!(Kind::Alive.prerequisite(), Some(Kind::Allow));
        assert_eq!(Kind::Join.prerequisite(), None);
    }

    #[test]
    fn test_tristate_option_mapping() {
        for t in [Tristate::Unknown, Tristate::True, Tristate::False] {
            assert_eq!(Tristate::from_option(t.to_option()), t);
        }
        assert_eq!(Tristate::default(), Tristate::Unknown);
    }

    #[test]
    fn test_auto_mode_parse() {
        assert_eq!("once".parse::<AutoMode>(), Ok(AutoMode::Once));
        assert_eq!("ALWAYS".parse::<AutoMode>(), Ok(AutoMode::Always));
        assert!("sometimes".parse::<AutoMode>().is_err());
        assert_eq!(AutoMode::Never.to_string(), "never");
    }
}
