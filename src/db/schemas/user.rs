//! User document schema
//!
//! Stores user credentials and the subscription plan. Registration lives
//! outside this crate; the core only reads users (and tests seed them).

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::plans::Plan;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// A registered account
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// The stable user id, also the `sub` of issued tokens
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub email: String,

    /// argon2id PHC string
    pub password_hash: String,

    /// Plan name; unknown values resolve to hobbyist limits
    #[serde(default = "default_plan")]
    pub plan: String,

    /// Deactivated accounts cannot log in and their tokens are refused
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn default_plan() -> String {
    Plan::default().to_string()
}

fn active_by_default() -> bool {
    true
}

impl UserDoc {
    /// Fresh id, hobbyist plan, active
    pub fn new(email: String, password_hash: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            email,
            password_hash,
            plan: default_plan(),
            is_active: true,
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = plan.to_string();
        self
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "email": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("users_email_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
