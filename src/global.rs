//! Process-wide client with lazy connect and reconnect.
//!
//! The module-level functions delegate to a default [`GlobalClient`] built
//! from [`ClientConfig::shared`]. Applications that want their own lifecycle
//! hold a `GlobalClient` directly.

use std::sync::{Arc, OnceLock};

use arrow_array::RecordBatch;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{BatchStream, Connection};
use crate::error::ClientError;
use crate::result::OperationResult;

/// Builds an unconnected [`Connection`] for each (re)connect.
pub type ConnectionFactory = Arc<dyn Fn() -> Result<Connection, ClientError> + Send + Sync>;

/// Owns at most one live [`Connection`].
///
/// Every call holds the slot lock for its whole duration, so concurrent
/// first callers share a single connect and calls on the session are
/// serialized.
pub struct GlobalClient {
    factory: ConnectionFactory,
    slot: Mutex<Option<Connection>>,
}

impl GlobalClient {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Connection, ClientError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            slot: Mutex::new(None),
        }
    }

    /// A client whose connections use `config` over gRPC.
    pub fn from_config(config: ClientConfig) -> Self {
        Self::new(move || Ok(Connection::new(config.clone())))
    }

    /// Replaces a missing or disconnected session with a fresh one.
    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Connection>,
    ) -> Result<&'a mut Connection, ClientError> {
        let live = slot.as_ref().is_some_and(Connection::is_connected);
        if !live {
            if let Some(mut stale) = slot.take() {
                debug!("replacing disconnected global client");
                stale.close().await;
            }
            let mut conn = (self.factory)()?;
            conn.connect().await?;
            info!(location = %conn.server_location(), "global client connected");
            *slot = Some(conn);
        }
        slot.as_mut().ok_or(ClientError::NotConnected)
    }

    pub async fn insert(
        &self,
        batch: &RecordBatch,
        table_name: &str,
    ) -> Result<OperationResult, ClientError> {
        let mut slot = self.slot.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        conn.insert(batch, table_name).await
    }

    pub async fn select(&self, query: &str) -> Result<RecordBatch, ClientError> {
        let mut slot = self.slot.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        conn.select(query).await
    }

    pub async fn select_streaming(&self, query: &str) -> Result<BatchStream, ClientError> {
        let mut slot = self.slot.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        conn.select_streaming(query).await
    }

    pub async fn update(
        &self,
        batch: &RecordBatch,
        table_name: &str,
    ) -> Result<OperationResult, ClientError> {
        let mut slot = self.slot.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        conn.update(batch, table_name).await
    }

    pub async fn delete(
        &self,
        batch: &RecordBatch,
        table_name: &str,
    ) -> Result<OperationResult, ClientError> {
        let mut slot = self.slot.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        conn.delete(batch, table_name).await
    }

    /// Closes and forgets the current session, if any.
    pub async fn close(&self) {
        if let Some(mut conn) = self.slot.lock().await.take() {
            conn.close().await;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(Connection::is_connected)
    }
}

static GLOBAL_CLIENT: OnceLock<GlobalClient> = OnceLock::new();

/// The default client. Configuration is read on the first connect, so a
/// broken config surfaces as [`ClientError::Config`] from that call.
pub fn global() -> &'static GlobalClient {
    GLOBAL_CLIENT.get_or_init(|| {
        GlobalClient::new(|| {
            let config = ClientConfig::shared().map_err(|e| ClientError::Config(format!("{e:#}")))?;
            Ok(Connection::new(config.clone()))
        })
    })
}

pub async fn insert(batch: &RecordBatch, table_name: &str) -> Result<OperationResult, ClientError> {
    global().insert(batch, table_name).await
}

pub async fn select(query: &str) -> Result<RecordBatch, ClientError> {
    global().select(query).await
}

pub async fn select_streaming(query: &str) -> Result<BatchStream, ClientError> {
    global().select_streaming(query).await
}

pub async fn update(batch: &RecordBatch, table_name: &str) -> Result<OperationResult, ClientError> {
    global().update(batch, table_name).await
}

pub async fn delete(batch: &RecordBatch, table_name: &str) -> Result<OperationResult, ClientError> {
    global().delete(batch, table_name).await
}

pub async fn close() {
    global().close().await
}
