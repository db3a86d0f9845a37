//! API key scopes
//!
//! Scope names are a closed whitelist. Keys can only be created with known
//! scopes, so a typo at creation time fails loudly instead of producing a key
//! that silently can't do anything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::types::GateError;

/// Capability granted to an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// List and inspect links
    ReadUrls,
    /// Create and edit links
    WriteUrls,
    /// Delete links
    DeleteUrls,
    /// Read click statistics
    ReadStats,
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::ReadUrls,
        Scope::WriteUrls,
        Scope::DeleteUrls,
        Scope::ReadStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::ReadUrls => "read_urls",
            Scope::WriteUrls => "write_urls",
            Scope::DeleteUrls => "delete_urls",
            Scope::ReadStats => "read_stats",
        }
    }

    /// Human-readable description for listings
    pub fn description(&self) -> &'static str {
        match self {
            Scope::ReadUrls => "Read links",
            Scope::WriteUrls => "Create and update links",
            Scope::DeleteUrls => "Delete links",
            Scope::ReadStats => "Read link statistics",
        }
    }
}

/// One line per scope, name then description, for operator listings
pub fn scope_listing() -> String {
    Scope::ALL
        .iter()
        .map(|scope| format!("{:<12} {}", scope.as_str(), scope.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_urls" => Ok(Scope::ReadUrls),
            "write_urls" => Ok(Scope::WriteUrls),
            "delete_urls" => Ok(Scope::DeleteUrls),
            "read_stats" => Ok(Scope::ReadStats),
            other => Err(GateError::BadRequest(format!("Unknown scope: {other}"))),
        }
    }
}

/// Check a requested scope set before it is stored on a key.
/// Unknown names and empty sets are rejected.
pub fn validate_scopes<I, S>(scopes: I) -> Result<BTreeSet<String>, GateError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut validated = BTreeSet::new();
    for scope in scopes {
        let scope: Scope = scope.as_ref().trim().parse()?;
        validated.insert(scope.as_str().to_string());
    }

    if validated.is_empty() {
        return Err(GateError::BadRequest(
            "An API key needs at least one scope".into(),
        ));
    }

    Ok(validated)
}
