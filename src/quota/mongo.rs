//! MongoDB counter store
//!
//! Increments run as `find_one_and_update` with `$inc` and `upsert` inside a
//! session transaction. Transactions need a replica set (a single-node one
//! is enough). Two first requests racing on an empty window can both try to
//! upsert; the loser sees a duplicate key error and is retried, at which point
//! the row exists and `$inc` applies to it.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::error::{
    Error as MongoError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use mongodb::options::ReturnDocument;
use mongodb::{Client, ClientSession};
use tracing::{debug, warn};

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{CounterDoc, MONTHLY_LINK_LIMIT_COLLECTION, RATE_LIMIT_COLLECTION};
use crate::quota::{CounterKey, CounterStore, Window};
use crate::types::{GateError, Result};

const MAX_ATTEMPTS: usize = 5;
const DUPLICATE_KEY: i32 = 11000;

/// Counter store on two MongoDB collections
#[derive(Clone)]
pub struct MongoCounterStore {
    client: Client,
    rate_limits: MongoCollection<CounterDoc>,
    monthly_links: MongoCollection<CounterDoc>,
}

impl MongoCounterStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            client: client.inner().clone(),
            rate_limits: client.collection(RATE_LIMIT_COLLECTION).await?,
            monthly_links: client.collection(MONTHLY_LINK_LIMIT_COLLECTION).await?,
        })
    }

    fn collection(&self, window: Window) -> &MongoCollection<CounterDoc> {
        match window {
            Window::Hourly => &self.rate_limits,
            Window::Monthly => &self.monthly_links,
        }
    }

    async fn increment_once(&self, key: &CounterKey) -> std::result::Result<u64, MongoError> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        match self.increment_in_session(key, &mut session).await {
            Ok(count) => {
                commit_with_retry(&mut session).await?;
                Ok(count)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    debug!("abort after failed increment also failed: {}", abort);
                }
                Err(e)
            }
        }
    }

    async fn increment_in_session(
        &self,
        key: &CounterKey,
        session: &mut ClientSession,
    ) -> std::result::Result<u64, MongoError> {
        let filter = doc! {
            "identifier": &key.identifier,
            "type": key.subject_type.as_str(),
            "window_start": bson::DateTime::from_chrono(key.window_start),
        };

        let updated = self
            .collection(key.window)
            .inner()
            .find_one_and_update(filter, doc! { "$inc": { "count": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;

        Ok(updated.map(|d| d.count.max(0) as u64).unwrap_or(1))
    }
}

async fn commit_with_retry(session: &mut ClientSession) -> std::result::Result<(), MongoError> {
    loop {
        match session.commit_transaction().await {
            Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => {
                debug!("commit result unknown, retrying commit");
                continue;
            }
            other => return other,
        }
    }
}

fn is_retryable(e: &MongoError) -> bool {
    if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        return true;
    }
    match e.kind.as_ref() {
        ErrorKind::Command(ce) => ce.code == DUPLICATE_KEY,
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[async_trait]
impl CounterStore for MongoCounterStore {
    async fn increment(&self, key: &CounterKey) -> Result<u64> {
        let mut attempt = 1;
        loop {
            match self.increment_once(key).await {
                Ok(count) => return Ok(count),
                Err(e) if attempt < MAX_ATTEMPTS && is_retryable(&e) => {
                    warn!(
                        attempt,
                        window = %key.window,
                        "counter increment conflicted, retrying: {}",
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    return Err(GateError::Storage(format!(
                        "Counter increment failed: {}",
                        e
                    )))
                }
            }
        }
    }

    async fn peek(&self, key: &CounterKey) -> Result<u64> {
        let found = self
            .collection(key.window)
            .find_one(doc! {
                "identifier": &key.identifier,
                "type": key.subject_type.as_str(),
                "window_start": bson::DateTime::from_chrono(key.window_start),
            })
            .await?;
        Ok(found.map(|d| d.count.max(0) as u64).unwrap_or(0))
    }

    async fn delete_before(&self, window: Window, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = self
            .collection(window)
            .inner()
            .delete_many(doc! { "window_start": { "$lt": bson::DateTime::from_chrono(cutoff) } })
            .await
            .map_err(|e| GateError::Storage(format!("Delete failed: {}", e)))?;

        debug!(%window, removed = result.deleted_count, "expired counters removed");
        Ok(result.deleted_count)
    }
}
