//! The fixed set of request variables available to log formatting.

use std::fmt;
use std::str::FromStr;

/// Value used for a variable whose source data is absent.
pub const MISSING: &str = "-";

/// Value used for a variable whose source data could not be parsed.
pub const INVALID: &str = "???";

/// One of the variables a [`RequestContext`](crate::context::RequestContext) exposes.
///
/// Names follow the uWSGI log-format vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextVar {
    Uri,
    Method,
    User,
    Addr,
    Host,
    Proto,
    Uagent,
    Referer,
    Status,
    Micros,
    Msecs,
    Time,
    Ctime,
    Rsize,
}

impl ContextVar {
    /// All variables, in canonical order.
    pub const ALL: [ContextVar; 14] = [
        ContextVar::Uri,
        ContextVar::Method,
        ContextVar::User,
        ContextVar::Addr,
        ContextVar::Host,
        ContextVar::Proto,
        ContextVar::Uagent,
        ContextVar::Referer,
        ContextVar::Status,
        ContextVar::Micros,
        ContextVar::Msecs,
        ContextVar::Time,
        ContextVar::Ctime,
        ContextVar::Rsize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uri => "uri",
            Self::Method => "method",
            Self::User => "user",
            Self::Addr => "addr",
            Self::Host => "host",
            Self::Proto => "proto",
            Self::Uagent => "uagent",
            Self::Referer => "referer",
            Self::Status => "status",
            Self::Micros => "micros",
            Self::Msecs => "msecs",
            Self::Time => "time",
            Self::Ctime => "ctime",
            Self::Rsize => "rsize",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ContextVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a name does not match any [`ContextVar`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown context variable: {0}")]
pub struct UnknownVar(pub String);

impl FromStr for ContextVar {
    type Err = UnknownVar;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContextVar::ALL
            .into_iter()
            .find(|var| var.as_str() == s)
            .ok_or_else(|| UnknownVar(s.to_string()))
    }
}

/// Snapshot of every [`ContextVar`] for one request at one instant.
///
/// Every variable always has a value; absent data reads as [`MISSING`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogVars {
    values: [String; 14],
}

impl Default for LogVars {
    fn default() -> Self {
        Self {
            values: std::array::from_fn(|_| MISSING.to_string()),
        }
    }
}

impl LogVars {
    pub fn get(&self, var: ContextVar) -> &str {
        &self.values[var.index()]
    }

    pub fn set(&mut self, var: ContextVar, value: impl Into<String>) {
        self.values[var.index()] = value.into();
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextVar, &str)> {
        ContextVar::ALL
            .into_iter()
            .map(|var| (var, self.get(var)))
    }
}
