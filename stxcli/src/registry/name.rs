//! Symbolic session names.

use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;

/// Which host a session is for, independent of its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionName {
    /// The controller currently holding the floating address.
    ActiveController,
    StandbyController,
    /// A subcloud's active controller, by subcloud name.
    Subcloud(String),
    /// The active controller of the central cloud in a distributed setup.
    CentralActive,
    NatBox,
    TestServer,
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionName::ActiveController => f.write_str("active-controller"),
            SessionName::StandbyController => f.write_str("standby-controller"),
            SessionName::Subcloud(name) => write!(f, "subcloud:{name}"),
            SessionName::CentralActive => f.write_str("central:active"),
            SessionName::NatBox => f.write_str("nat-box"),
            SessionName::TestServer => f.write_str("test-server"),
        }
    }
}

impl FromStr for SessionName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active-controller" => Ok(SessionName::ActiveController),
            "standby-controller" => Ok(SessionName::StandbyController),
            "central:active" => Ok(SessionName::CentralActive),
            "nat-box" => Ok(SessionName::NatBox),
            "test-server" => Ok(SessionName::TestServer),
            _ => match s.strip_prefix("subcloud:") {
                Some(name) if !name.is_empty() && !name.contains(char::is_whitespace) => {
                    Ok(SessionName::Subcloud(name.to_string()))
                }
                _ => Err(RegistryError::InvalidName(s.to_string())),
            },
        }
    }
}
