//! Request admission
//!
//! `Gate` runs the whole decision for one request: resolve the principal,
//! check the scope, look up the plan, then count the request against the
//! hourly limit. Link creation additionally counts against the monthly link
//! limit. HTTP handlers map the returned error with `GateError::status_code`.

use chrono::{DateTime, Utc};
use hyper::header::HeaderMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::principal::{authorize, Principal};
use crate::auth::resolver::PrincipalResolver;
use crate::auth::scopes::Scope;
use crate::db::CredentialStore;
use crate::logging::{AuditEvent, AuditEventType, AuditLogger};
use crate::plans::{Plan, PlanLimits, PlanRegistry};
use crate::quota::{QuotaLedger, QuotaStatus};
use crate::types::{GateError, Result};

/// An admitted request
#[derive(Debug, Clone)]
pub struct Admission {
    pub principal: Principal,
    pub plan: Plan,
    pub limits: PlanLimits,
    /// Hourly request counter after this request
    pub rate_limit: QuotaStatus,
    /// Monthly link counter, set for link creation only
    pub link_quota: Option<QuotaStatus>,
}

impl Admission {
    /// Write the hourly `X-RateLimit-*` headers for the response
    pub fn apply_headers(&self, headers: &mut HeaderMap, now: DateTime<Utc>) {
        self.rate_limit.apply_headers(headers, now);
    }
}

/// Authentication, authorization and quota in one call
#[derive(Clone)]
pub struct Gate {
    resolver: PrincipalResolver,
    store: Arc<dyn CredentialStore>,
    plans: PlanRegistry,
    ledger: QuotaLedger,
    audit: AuditLogger,
}

impl Gate {
    pub fn new(
        resolver: PrincipalResolver,
        store: Arc<dyn CredentialStore>,
        ledger: QuotaLedger,
    ) -> Self {
        Self {
            resolver,
            store,
            plans: PlanRegistry::default(),
            ledger,
            audit: AuditLogger::disabled(),
        }
    }

    pub fn with_plans(mut self, plans: PlanRegistry) -> Self {
        self.plans = plans;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Admit a request needing `required_scope` (if any)
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        required_scope: Option<Scope>,
    ) -> Result<Admission> {
        let principal = self.resolver.resolve(headers, peer).await.into_result()?;

        if let Some(scope) = required_scope {
            if !authorize(&principal, scope) {
                debug!(key_id = %principal.identifier, %scope, "Scope denied");
                self.audit
                    .log(
                        AuditEvent::new(AuditEventType::ScopeDenied)
                            .with_principal(&principal)
                            .with_scope(scope.as_str()),
                    )
                    .await;
                return Err(GateError::Forbidden(format!(
                    "API key lacks the {} scope",
                    scope
                )));
            }
        }

        let plan = self.plan_for(&principal).await?;
        let limits = self.plans.limits(plan);

        let (identifier, subject_type) = principal.quota_subject();
        let rate_limit = self
            .ledger
            .check_rate_limit(identifier, subject_type, limits.hourly_request_limit)
            .await?;

        if rate_limit.exceeded {
            info!(%subject_type, %plan, limit = rate_limit.limit, "Hourly request limit exceeded");
            self.audit
                .log(
                    AuditEvent::new(AuditEventType::RateLimited)
                        .with_principal(&principal)
                        .with_quota(&rate_limit),
                )
                .await;
            return Err(GateError::RateLimited {
                limit: rate_limit.limit,
                reset: rate_limit.reset,
            });
        }

        Ok(Admission {
            principal,
            plan,
            limits,
            rate_limit,
            link_quota: None,
        })
    }

    /// Admit a link creation: `write_urls` scope, hourly limit, monthly link limit
    pub async fn admit_link_creation(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Result<Admission> {
        let mut admission = self.admit(headers, peer, Some(Scope::WriteUrls)).await?;

        let (identifier, subject_type) = admission.principal.quota_subject();
        let link_quota = self
            .ledger
            .check_monthly_link_limit(
                identifier,
                subject_type,
                admission.limits.monthly_link_limit,
            )
            .await?;

        if link_quota.exceeded {
            info!(%subject_type, plan = %admission.plan, limit = link_quota.limit, "Monthly link limit exceeded");
            self.audit
                .log(
                    AuditEvent::new(AuditEventType::LinkQuotaExceeded)
                        .with_principal(&admission.principal)
                        .with_quota(&link_quota),
                )
                .await;
            return Err(GateError::RateLimited {
                limit: link_quota.limit,
                reset: link_quota.reset,
            });
        }

        admission.link_quota = Some(link_quota);
        Ok(admission)
    }

    /// Plan of the user a principal acts for. Anonymous callers and users
    /// without a local record are on the default plan.
    async fn plan_for(&self, principal: &Principal) -> Result<Plan> {
        let Some(user_id) = principal.acting_user_id() else {
            return Ok(Plan::default());
        };

        match self.store.find_user(user_id).await? {
            Some(user) if !user.is_active => {
                Err(GateError::Unauthorized("Account is inactive".into()))
            }
            Some(user) => Ok(Plan::from_name(&user.plan)),
            None => Ok(Plan::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::api_key::ApiKeyService;
    use crate::auth::jwt::{sign_token, JwtConfig};
    use crate::auth::password::{HashParams, SecretHasher};
    use crate::auth::provider::AuthProvider;
    use crate::db::schemas::UserDoc;
    use crate::db::MemoryCredentialStore;
    use crate::quota::SqliteCounterStore;
    use hyper::header::{HeaderValue, AUTHORIZATION};

    struct Fixture {
        gate: Gate,
        keys: ApiKeyService,
        store: Arc<MemoryCredentialStore>,
        jwt: JwtConfig,
    }

    fn fixture(plans: PlanRegistry) -> Fixture {
        let jwt = JwtConfig::hs256("gate-secret");
        let store = Arc::new(MemoryCredentialStore::new());
        let resolver =
            PrincipalResolver::new(AuthProvider::Local { jwt: jwt.clone() }, store.clone());
        let ledger = QuotaLedger::new(Arc::new(SqliteCounterStore::open_in_memory().unwrap()));
        let gate = Gate::new(resolver, store.clone(), ledger).with_plans(plans);
        let keys = ApiKeyService::new(store.clone()).with_hasher(SecretHasher::new(HashParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
            output_len: 32,
        }));
        Fixture {
            gate,
            keys,
            store,
            jwt,
        }
    }

    async fn add_user(store: &MemoryCredentialStore, plan: Plan) -> String {
        let user = UserDoc::new(format!("{}@example.com", uuid::Uuid::new_v4()), "x".into())
            .with_plan(plan);
        let id = user.id.clone();
        store.insert_user(user).await.unwrap();
        id
    }

    fn bearer(jwt: &JwtConfig, user_id: &str) -> HeaderMap {
        let token = sign_token(user_id, jwt).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn peer() -> Option<SocketAddr> {
        Some("198.51.100.20:40000".parse().unwrap())
    }

    #[tokio::test]
    async fn test_anonymous_hits_hourly_limit() {
        let f = fixture(PlanRegistry::default());
        for expected in [4, 3, 2, 1, 0] {
            let admission = f.gate.admit(&HeaderMap::new(), peer(), None).await.unwrap();
            assert_eq!(admission.rate_limit.remaining, expected);
            assert_eq!(admission.plan, Plan::Hobbyist);
        }
        assert!(matches!(
            f.gate.admit(&HeaderMap::new(), peer(), None).await,
            Err(GateError::RateLimited { limit: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_pro_user_is_unlimited() {
        let f = fixture(PlanRegistry::default());
        let id = add_user(&f.store, Plan::Pro).await;
        let headers = bearer(&f.jwt, &id);
        for _ in 0..12 {
            let admission = f.gate.admit(&headers, peer(), Some(Scope::ReadUrls)).await.unwrap();
            assert_eq!(admission.rate_limit.remaining, -1);
            assert_eq!(admission.plan, Plan::Pro);
        }
    }

    #[tokio::test]
    async fn test_service_key_scope_and_owner_quota() {
        let f = fixture(PlanRegistry::default());
        let owner = add_user(&f.store, Plan::Hobbyist).await;
        let created = f
            .keys
            .create(&Principal::user(owner.clone()), "reader", ["read_urls"])
            .await
            .unwrap();

        let mut key_headers = HeaderMap::new();
        key_headers.insert("x-api-key", HeaderValue::from_str(&created.secret).unwrap());

        assert!(matches!(
            f.gate.admit(&key_headers, peer(), Some(Scope::WriteUrls)).await,
            Err(GateError::Forbidden(_))
        ));

        let admission = f
            .gate
            .admit(&key_headers, peer(), Some(Scope::ReadUrls))
            .await
            .unwrap();
        assert_eq!(admission.rate_limit.remaining, 4);

        // The owner's own token shares the same counter
        let admission = f.gate.admit(&bearer(&f.jwt, &owner), peer(), None).await.unwrap();
        assert_eq!(admission.rate_limit.remaining, 3);
    }

    #[tokio::test]
    async fn test_bad_api_key_is_rejected() {
        let f = fixture(PlanRegistry::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("lg_definitely-not-valid"));
        let err = f.gate.admit(&headers, peer(), None).await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_monthly_link_limit() {
        let plans = PlanRegistry::default().with_limits(
            Plan::VerifiedAccess,
            PlanLimits {
                hourly_request_limit: 0,
                monthly_link_limit: 2,
            },
        );
        let f = fixture(plans);
        let id = add_user(&f.store, Plan::VerifiedAccess).await;
        let headers = bearer(&f.jwt, &id);

        for expected in [1, 0] {
            let admission = f.gate.admit_link_creation(&headers, peer()).await.unwrap();
            assert_eq!(admission.link_quota.unwrap().remaining, expected);
        }
        let err = f.gate.admit_link_creation(&headers, peer()).await.unwrap_err();
        assert!(matches!(err, GateError::RateLimited { limit: 2, .. }));
    }

    #[tokio::test]
    async fn test_inactive_user_rejected() {
        let f = fixture(PlanRegistry::default());
        let mut user = UserDoc::new("gone@example.com".into(), "x".into());
        user.is_active = false;
        let id = user.id.clone();
        f.store.insert_user(user).await.unwrap();

        assert!(matches!(
            f.gate.admit(&bearer(&f.jwt, &id), peer(), None).await,
            Err(GateError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_subject_gets_default_plan() {
        let f = fixture(PlanRegistry::default());
        let admission = f
            .gate
            .admit(&bearer(&f.jwt, "user_from_elsewhere"), peer(), None)
            .await
            .unwrap();
        assert_eq!(admission.plan, Plan::Hobbyist);
        assert_eq!(admission.rate_limit.limit, 5);
    }
}
