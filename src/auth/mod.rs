//! Authentication and authorization for linkgate
//!
//! Provides:
//! - Bearer token signing and verification (HS256 / RS256)
//! - API key issuance and lookup
//! - Argon2id secret hashing
//! - Principal resolution and scope checks
//! - Pluggable token validation (local, external JWT, delegated)

pub mod api_key;
pub mod clerk;
pub mod jwt;
pub mod login;
pub mod password;
pub mod principal;
pub mod provider;
pub mod resolver;
pub mod scopes;

#[cfg(test)]
pub(crate) mod test_keys;

pub use api_key::{
    api_key_lookup_prefix, generate_api_key_secret, ApiKeyService, ApiKeySummary, CreatedApiKey,
    API_KEY_PREFIX,
};
pub use clerk::ClerkProvider;
pub use jwt::{extract_token_from_header, sign_token, verify_token, JwtAlgorithm, JwtConfig};
pub use login::{LocalLogin, LoginResponse};
pub use password::{hash_secret, hash_secret_with, verify_secret, HashParams, SecretHasher};
pub use principal::{authorize, require_authenticated, require_scope, Principal, PrincipalKind};
pub use provider::{
    AuthMode, AuthProvider, AuthSettings, ClerkConfig, DelegatedSession, IdentityProvider,
};
pub use resolver::{client_ip, PrincipalResolver, Resolution, API_KEY_HEADER};
pub use scopes::{scope_listing, validate_scopes, Scope};
