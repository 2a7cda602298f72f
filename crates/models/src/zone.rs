//! Zone — a tenant-isolation boundary with its own monotonic revision
//! counter (GLOSSARY "Zone"). Plain string so callers can use tenant ids,
//! slugs, or a literal "default" without this crate mandating a shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub const DEFAULT: &'static str = "default";

    pub fn default_zone() -> Self {
        ZoneId(Self::DEFAULT.to_string())
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::default_zone()
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        ZoneId(s.to_string())
    }
}

impl From<String> for ZoneId {
    fn from(s: String) -> Self {
        ZoneId(s)
    }
}
