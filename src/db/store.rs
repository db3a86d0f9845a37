//! User and API key repository
//!
//! `CredentialStore` is the seam between the auth core and persistence.
//! `MongoCredentialStore` is the production backend; `MemoryCredentialStore`
//! backs tests and single-process tooling.

use async_trait::async_trait;
use bson::doc;
use dashmap::DashMap;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{ApiKeyDoc, UserDoc, API_KEY_COLLECTION, USER_COLLECTION};
use crate::types::Result;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserDoc>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>>;

    async fn insert_user(&self, user: UserDoc) -> Result<()>;

    /// Change a user's plan. Returns false when the user does not exist.
    async fn set_user_plan(&self, user_id: &str, plan: &str) -> Result<bool>;

    async fn insert_api_key(&self, key: ApiKeyDoc) -> Result<()>;

    /// All keys sharing a lookup prefix (normally zero or one)
    async fn find_api_keys_by_prefix(&self, lookup_prefix: &str) -> Result<Vec<ApiKeyDoc>>;

    async fn list_api_keys(&self, owner_user_id: &str) -> Result<Vec<ApiKeyDoc>>;

    /// Delete a key owned by `owner_user_id`. Returns false when nothing matched.
    async fn delete_api_key(&self, owner_user_id: &str, key_id: &str) -> Result<bool>;
}

/// In-memory store
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: DashMap<String, UserDoc>,
    api_keys: DashMap<String, ApiKeyDoc>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserDoc>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone()))
    }

    async fn insert_user(&self, user: UserDoc) -> Result<()> {
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn set_user_plan(&self, user_id: &str, plan: &str) -> Result<bool> {
        match self.users.get_mut(user_id) {
            Some(mut user) => {
                user.plan = plan.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_api_key(&self, key: ApiKeyDoc) -> Result<()> {
        self.api_keys.insert(key.id.clone(), key);
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, lookup_prefix: &str) -> Result<Vec<ApiKeyDoc>> {
        Ok(self
            .api_keys
            .iter()
            .filter(|k| k.lookup_prefix == lookup_prefix)
            .map(|k| k.clone())
            .collect())
    }

    async fn list_api_keys(&self, owner_user_id: &str) -> Result<Vec<ApiKeyDoc>> {
        let mut keys: Vec<ApiKeyDoc> = self
            .api_keys
            .iter()
            .filter(|k| k.owner_user_id == owner_user_id)
            .map(|k| k.clone())
            .collect();
        keys.sort_by(|a, b| a.metadata.created_at.cmp(&b.metadata.created_at));
        Ok(keys)
    }

    async fn delete_api_key(&self, owner_user_id: &str, key_id: &str) -> Result<bool> {
        Ok(self
            .api_keys
            .remove_if(key_id, |_, k| k.owner_user_id == owner_user_id)
            .is_some())
    }
}

/// MongoDB-backed store
#[derive(Clone)]
pub struct MongoCredentialStore {
    users: MongoCollection<UserDoc>,
    api_keys: MongoCollection<ApiKeyDoc>,
}

impl MongoCredentialStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            users: client.collection(USER_COLLECTION).await?,
            api_keys: client.collection(API_KEY_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl CredentialStore for MongoCredentialStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "_id": user_id }).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "email": email }).await
    }

    async fn insert_user(&self, user: UserDoc) -> Result<()> {
        self.users.insert_one(user).await
    }

    async fn set_user_plan(&self, user_id: &str, plan: &str) -> Result<bool> {
        let result = self
            .users
            .update_one(doc! { "_id": user_id }, doc! { "$set": { "plan": plan } })
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn insert_api_key(&self, key: ApiKeyDoc) -> Result<()> {
        self.api_keys.insert_one(key).await
    }

    async fn find_api_keys_by_prefix(&self, lookup_prefix: &str) -> Result<Vec<ApiKeyDoc>> {
        self.api_keys
            .find_many(doc! { "lookup_prefix": lookup_prefix })
            .await
    }

    async fn list_api_keys(&self, owner_user_id: &str) -> Result<Vec<ApiKeyDoc>> {
        self.api_keys
            .find_many(doc! { "owner_user_id": owner_user_id })
            .await
    }

    async fn delete_api_key(&self, owner_user_id: &str, key_id: &str) -> Result<bool> {
        self.api_keys
            .delete_one(doc! { "_id": key_id, "owner_user_id": owner_user_id })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn key(owner: &str, prefix: &str) -> ApiKeyDoc {
        ApiKeyDoc::new(
            "$argon2id$placeholder".into(),
            prefix.into(),
            "ci".into(),
            owner.into(),
            BTreeSet::from(["read_urls".to_string()]),
        )
    }

    #[tokio::test]
    async fn test_user_plan_update() {
        let store = MemoryCredentialStore::new();
        let user = UserDoc::new("a@example.com".into(), "hash".into());
        let id = user.id.clone();
        store.insert_user(user).await.unwrap();

        assert_eq!(store.find_user(&id).await.unwrap().unwrap().plan, "hobbyist");
        assert!(store.set_user_plan(&id, "pro").await.unwrap());
        assert_eq!(store.find_user(&id).await.unwrap().unwrap().plan, "pro");
        assert!(!store.set_user_plan("missing", "pro").await.unwrap());

        let by_email = store.find_user_by_email("a@example.com").await.unwrap();
        assert_eq!(by_email.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = MemoryCredentialStore::new();
        let k = key("owner-1", "abcdefghijkl");
        let id = k.id.clone();
        store.insert_api_key(k).await.unwrap();

        assert!(!store.delete_api_key("someone-else", &id).await.unwrap());
        assert_eq!(store.list_api_keys("owner-1").await.unwrap().len(), 1);
        assert!(store.delete_api_key("owner-1", &id).await.unwrap());
        assert!(store
            .find_api_keys_by_prefix("abcdefghijkl")
            .await
            .unwrap()
            .is_empty());
    }
}
