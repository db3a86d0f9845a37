//! Persistence for users and API keys

pub mod mongo;
pub mod schemas;
pub mod store;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
pub use store::{CredentialStore, MemoryCredentialStore, MongoCredentialStore};
