//! Subscription plans and their limits
//!
//! The registry is the one place tier economics live. A limit of `0` means
//! unlimited. Unknown plan names resolve to the hobbyist tier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Hobbyist,
    VerifiedAccess,
    Pro,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Hobbyist, Plan::VerifiedAccess, Plan::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Hobbyist => "hobbyist",
            Plan::VerifiedAccess => "verified_access",
            Plan::Pro => "pro",
        }
    }

    /// Parse a stored plan name, falling back to the default tier
    pub fn from_name(name: &str) -> Plan {
        name.parse().unwrap_or_default()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "hobbyist" => Ok(Plan::Hobbyist),
            "verified_access" => Ok(Plan::VerifiedAccess),
            "pro" => Ok(Plan::Pro),
            other => Err(format!("unknown plan: {other:?}")),
        }
    }
}

/// Numeric limits for a plan; 0 means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub hourly_request_limit: u64,
    pub monthly_link_limit: u64,
}

/// Lookup table from plan to limits
#[derive(Debug, Clone)]
pub struct PlanRegistry {
    limits: HashMap<Plan, PlanLimits>,
}

impl Default for PlanRegistry {
    fn default() -> Self {
        let limits = HashMap::from([
            (
                Plan::Hobbyist,
                PlanLimits {
                    hourly_request_limit: 5,
                    monthly_link_limit: 1_000,
                },
            ),
            (
                Plan::VerifiedAccess,
                PlanLimits {
                    hourly_request_limit: 0,
                    monthly_link_limit: 1_000,
                },
            ),
            (
                Plan::Pro,
                PlanLimits {
                    hourly_request_limit: 0,
                    monthly_link_limit: 10_000,
                },
            ),
        ]);
        Self { limits }
    }
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the limits of one tier
    pub fn with_limits(mut self, plan: Plan, limits: PlanLimits) -> Self {
        self.limits.insert(plan, limits);
        self
    }

    pub fn limits(&self, plan: Plan) -> PlanLimits {
        self.limits
            .get(&plan)
            .or_else(|| self.limits.get(&Plan::Hobbyist))
            .copied()
            .unwrap_or(PlanLimits {
                hourly_request_limit: 5,
                monthly_link_limit: 1_000,
            })
    }

    /// Limits for a plan name; unknown or empty names get hobbyist limits
    pub fn limits_for(&self, plan: &str) -> PlanLimits {
        self.limits(Plan::from_name(plan))
    }
}

/// Hourly request limit for a plan name (0 = unlimited)
pub fn rate_limit_for_plan(plan: &str) -> u64 {
    PlanRegistry::default().limits_for(plan).hourly_request_limit
}

/// Monthly link limit for a plan name (0 = unlimited)
pub fn monthly_link_limit_for_plan(plan: &str) -> u64 {
    PlanRegistry::default().limits_for(plan).monthly_link_limit
}
