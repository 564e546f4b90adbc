//! # Remote Key-Value Storage
//!
//! Writes go through the storage stream's dispatcher and are batched like
//! every other upload. Reads and deletes are direct round trips and need
//! an authenticated session.
//!
//! ```text
//!   put(name, payload, scope, keep) ──► BatchDispatcher ──► POST /v1/storage
//!   get(name, scope)                ──────────────────────► GET  /v1/storage?name&scope
//!   delete(scope, name)             ──────────────────────► DELETE /v1/storage?scope&name
//! ```

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use lumen_core::{BatchEntry, KeepPolicy, Record, StorageScope};

use crate::dispatcher::{BatchDispatcher, StreamKind};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{StorageBatch, WireEntry, STORAGE_PATH};
use crate::session::AuthSession;
use crate::transport::HttpMethod;

pub struct StorageClient {
    session: Arc<AuthSession>,
    dispatcher: Arc<BatchDispatcher>,
}

impl StorageClient {
    pub fn new(session: Arc<AuthSession>, dispatcher: Arc<BatchDispatcher>) -> ClientResult<Self> {
        if dispatcher.kind() != StreamKind::Storage {
            return Err(ClientError::Unsupported(format!(
                "storage client over the {} stream",
                dispatcher.kind()
            )));
        }
        Ok(StorageClient {
            session,
            dispatcher,
        })
    }

    /// Queues a value for upload.
    pub fn put(&self, name: impl Into<String>, payload: Record, scope: StorageScope, keep: KeepPolicy) {
        let entry = BatchEntry::new(name, payload, Utc::now())
            .with_scope(scope)
            .with_keep_policy(keep);
        self.dispatcher.add(entry);
    }

    /// Values stored under `name`, oldest first. Empty when none exist.
    pub async fn get(&self, name: &str, scope: StorageScope) -> ClientResult<Vec<WireEntry>> {
        self.ensure_authenticated()?;

        let request = self
            .session
            .signed_request(HttpMethod::Get, STORAGE_PATH, None)?
            .with_query("name", name)
            .with_query("scope", scope.as_str());

        let api = self.session.api();
        let bytes = api.send(request).await?;
        let batch: Option<StorageBatch> = api.decode(&bytes)?;
        let entries = batch.map(|b| b.data).unwrap_or_default();

        debug!(name, scope = %scope, count = entries.len(), "Storage read");
        Ok(entries)
    }

    /// Removes the value stored under `name`.
    pub async fn delete(&self, scope: StorageScope, name: &str) -> ClientResult<()> {
        self.ensure_authenticated()?;

        let request = self
            .session
            .signed_request(HttpMethod::Delete, STORAGE_PATH, None)?
            .with_query("scope", scope.as_str())
            .with_query("name", name);

        self.session.api().send(request).await?;
        info!(name, scope = %scope, "Storage value deleted");
        Ok(())
    }

    fn ensure_authenticated(&self) -> ClientResult<()> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(ClientError::NotAuthenticated)
        }
    }
}
