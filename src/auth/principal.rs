//! Request principals and scope checks
//!
//! A principal is built per request and never persisted. Plain users carry no
//! scope restriction. Service keys are limited to the scopes stored on the key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::auth::scopes::Scope;
use crate::quota::SubjectType;
use crate::types::GateError;

/// Who is making the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Anonymous,
    ServiceKey,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalKind::User => write!(f, "user"),
            PrincipalKind::Anonymous => write!(f, "anonymous"),
            PrincipalKind::ServiceKey => write!(f, "service_key"),
        }
    }
}

/// Resolved identity of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub kind: PrincipalKind,
    /// User id, client IP or API key id, depending on `kind`
    pub identifier: String,
    /// Granted scopes; only meaningful for service keys
    pub scopes: BTreeSet<String>,
    /// Owning user of a service key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<String>,
}

impl Principal {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::User,
            identifier: user_id.into(),
            scopes: BTreeSet::new(),
            owner_user_id: None,
        }
    }

    pub fn anonymous(client_ip: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::Anonymous,
            identifier: client_ip.into(),
            scopes: BTreeSet::new(),
            owner_user_id: None,
        }
    }

    pub fn service_key(
        key_id: impl Into<String>,
        owner_user_id: impl Into<String>,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            kind: PrincipalKind::ServiceKey,
            identifier: key_id.into(),
            scopes,
            owner_user_id: Some(owner_user_id.into()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == PrincipalKind::Anonymous
    }

    /// User id the request acts for. Service keys act for their owner.
    pub fn acting_user_id(&self) -> Option<&str> {
        match self.kind {
            PrincipalKind::User => Some(&self.identifier),
            PrincipalKind::ServiceKey => self.owner_user_id.as_deref(),
            PrincipalKind::Anonymous => None,
        }
    }

    /// Identifier and subject type that quota counters are charged to
    pub fn quota_subject(&self) -> (&str, SubjectType) {
        match self.acting_user_id() {
            Some(user_id) => (user_id, SubjectType::User),
            None => (&self.identifier, SubjectType::Ip),
        }
    }
}

/// Whether the principal may use `scope`
pub fn authorize(principal: &Principal, scope: Scope) -> bool {
    match principal.kind {
        PrincipalKind::ServiceKey => principal.scopes.contains(scope.as_str()),
        PrincipalKind::User | PrincipalKind::Anonymous => true,
    }
}

pub fn require_scope(principal: &Principal, scope: Scope) -> Result<(), GateError> {
    if authorize(principal, scope) {
        Ok(())
    } else {
        Err(GateError::Forbidden(format!(
            "API key lacks the {} scope",
            scope
        )))
    }
}

pub fn require_authenticated(principal: &Principal) -> Result<(), GateError> {
    if principal.is_anonymous() {
        Err(GateError::Unauthorized("Authentication required".into()))
    } else {
        Ok(())
    }
}
