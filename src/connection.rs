//! Connection manager: one Flight session with auth auto-detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrow_array::RecordBatch;
use arrow_flight::{FlightDescriptor, Ticket};
use arrow_schema::Schema;
use arrow_select::concat::concat_batches;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, error, info, warn};

use crate::action::{self, ActionKind};
use crate::auth::{classify_auth_failure, classify_probe_failure, ProbeOutcome};
use crate::config::ClientConfig;
use crate::error::{ClientError, OperationKind};
use crate::result::{ConnectionStats, OperationResult};
use crate::transport::{Connector, FlightTransport, GrpcConnector, TransportError};

/// Lazily decoded batches of a streaming select.
pub type BatchStream = BoxStream<'static, Result<RecordBatch, ClientError>>;

const QUERY_PREVIEW_CHARS: usize = 100;

/// A single Flight session against the configured server.
///
/// CRUD calls require a prior successful [`Connection::connect`]; they never
/// connect on their own.
///
/// # Example
///
/// ```rust,ignore
/// use a2flight_client::{ClientConfig, Connection};
///
/// let mut conn = Connection::connect_new(ClientConfig::load()?).await?;
/// let users = conn.select("SELECT * FROM users").await?;
/// conn.close().await;
/// ```
pub struct Connection {
    config: ClientConfig,
    location: String,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn FlightTransport>>,
    /// Shared with open result streams so a stream cut off by an
    /// unreachable server can drop the session.
    connected: Arc<AtomicBool>,
    authenticated: bool,
}

impl Connection {
    /// Creates an unconnected client using the gRPC transport.
    pub fn new(config: ClientConfig) -> Self {
        let connector = GrpcConnector::new().with_max_message_size(config.max_message_size);
        Self::with_connector(config, Arc::new(connector))
    }

    /// Creates an unconnected client over a custom transport.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let location = config.server_location();
        Self {
            config,
            location,
            connector,
            transport: None,
            connected: Arc::new(AtomicBool::new(false)),
            authenticated: false,
        }
    }

    /// Constructs and connects in one step.
    pub async fn connect_new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut conn = Self::new(config);
        conn.connect().await?;
        Ok(conn)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn server_location(&self) -> &str {
        &self.location
    }

    /// Opens the transport and decides whether to authenticate.
    ///
    /// With an API key configured, an anonymous `list_actions` probe tells
    /// whether the server requires authentication. The probe is a heuristic:
    /// a server whose introspection call fails differently from its data
    /// calls can be misclassified.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.is_connected() {
            debug!(location = %self.location, "already connected");
            return Ok(());
        }
        if self.transport.is_some() {
            self.close().await;
        }

        info!(
            location = %self.location,
            client = %self.config.client_name,
            "connecting to Arrow Flight server"
        );
        let mut transport = self
            .connector
            .open(&self.location)
            .await
            .map_err(|e| transport_failure(&self.location, e))?;

        let authenticated = match self.config.api_key() {
            None => {
                info!("no API key configured; connecting without authentication");
                false
            }
            Some(api_key) => {
                let api_key = api_key.to_string();
                detect_and_authenticate(&self.config, &self.location, transport.as_mut(), &api_key)
                    .await?
            }
        };

        self.transport = Some(transport);
        self.connected.store(true, Ordering::SeqCst);
        self.authenticated = authenticated;
        info!(
            location = %self.location,
            authenticated,
            "connected to Arrow Flight server"
        );
        Ok(())
    }

    /// Runs the credential handshake on the open transport.
    pub async fn authenticate(&mut self) -> Result<(), ClientError> {
        let api_key = self
            .config
            .api_key()
            .ok_or_else(|| ClientError::Config("no API key configured".to_string()))?
            .to_string();
        let mut transport = self.transport.take().ok_or(ClientError::NotConnected)?;
        let outcome = handshake(&self.config, &self.location, transport.as_mut(), &api_key).await;
        self.transport = Some(transport);
        outcome?;
        self.authenticated = true;
        Ok(())
    }

    /// Writes `batch` into `table_name` through `DoPut`.
    pub async fn insert(
        &mut self,
        batch: &RecordBatch,
        table_name: &str,
    ) -> Result<OperationResult, ClientError> {
        let context = rows_context(batch, table_name);
        let transport = self.session(OperationKind::Insert, &context)?;
        info!(rows = batch.num_rows(), table = %table_name, "INSERT");
        let started = Instant::now();

        let descriptor = FlightDescriptor::new_path(vec![table_name.to_string()]);
        let outcome = transport
            .do_put(descriptor, batch.schema(), vec![batch.clone()])
            .await;
        if let Err(err) = outcome {
            return Err(self.operation_failure(OperationKind::Insert, context, err));
        }

        let result = OperationResult::new(
            true,
            batch.num_rows() as u64,
            started.elapsed(),
            Some("flight".to_string()),
        );
        info!(
            rows_written = result.rows_affected,
            elapsed_ms = format!("{:.1}", result.execution_time_ms),
            "INSERT complete"
        );
        Ok(result)
    }

    /// Runs `query` and materializes the whole result into one batch.
    ///
    /// A result without batches yields an empty batch with an empty schema.
    pub async fn select(&mut self, query: &str) -> Result<RecordBatch, ClientError> {
        let context = query_context(query);
        let transport = self.session(OperationKind::Select, &context)?;
        info!(query = %context, "SELECT");
        let started = Instant::now();

        let collected = match transport.do_get(Ticket::new(query.to_string())).await {
            Ok(stream) => stream.try_collect::<Vec<_>>().await,
            Err(err) => Err(err),
        };
        let batches = match collected {
            Ok(batches) => batches,
            Err(err) => return Err(self.operation_failure(OperationKind::Select, context, err)),
        };

        let batch = match batches.first() {
            None => RecordBatch::new_empty(Arc::new(Schema::empty())),
            Some(first) => concat_batches(&first.schema(), &batches).map_err(|e| {
                ClientError::operation(OperationKind::Select, context.clone(), e)
            })?,
        };
        info!(
            rows = batch.num_rows(),
            elapsed_ms = format!("{:.1}", started.elapsed().as_secs_f64() * 1000.0),
            "SELECT complete"
        );
        Ok(batch)
    }

    /// Runs `query` and yields its batches as they arrive.
    ///
    /// The stream is forward-only; reading the result again takes a new call.
    /// If the server becomes unreachable mid-stream, the error surfaces as
    /// [`ClientError::ServerNotRunning`] and the session is marked
    /// disconnected.
    pub async fn select_streaming(&mut self, query: &str) -> Result<BatchStream, ClientError> {
        let context = query_context(query);
        let transport = self.session(OperationKind::SelectStreaming, &context)?;
        info!(query = %context, "SELECT streaming");

        let stream = match transport.do_get(Ticket::new(query.to_string())).await {
            Ok(stream) => stream,
            Err(err) => {
                return Err(self.operation_failure(OperationKind::SelectStreaming, context, err))
            }
        };
        let location = self.location.clone();
        let connected = Arc::clone(&self.connected);
        let stream = stream.map_err(move |err| {
            operation_failure(
                &location,
                &connected,
                OperationKind::SelectStreaming,
                context.clone(),
                err,
            )
        });
        Ok(stream.boxed())
    }

    /// Applies `batch` to `table_name` through the `update` action.
    pub async fn update(
        &mut self,
        batch: &RecordBatch,
        table_name: &str,
    ) -> Result<OperationResult, ClientError> {
        self.run_action(OperationKind::Update, ActionKind::Update, batch, table_name)
            .await
    }

    /// Removes the rows keyed by `batch` from `table_name` through the
    /// `delete` action.
    pub async fn delete(
        &mut self,
        batch: &RecordBatch,
        table_name: &str,
    ) -> Result<OperationResult, ClientError> {
        self.run_action(OperationKind::Delete, ActionKind::Delete, batch, table_name)
            .await
    }

    async fn run_action(
        &mut self,
        operation: OperationKind,
        kind: ActionKind,
        batch: &RecordBatch,
        table_name: &str,
    ) -> Result<OperationResult, ClientError> {
        let context = rows_context(batch, table_name);
        let transport = self.session(operation, &context)?;
        info!(rows = batch.num_rows(), table = %table_name, "{operation}");

        match action::execute(transport, kind, table_name, batch).await {
            Ok(result) => Ok(result),
            Err(err) => match err {
                action::ActionError::Transport(inner) => {
                    Err(self.operation_failure(operation, context, inner))
                }
                other => {
                    error!(%operation, error = %other, "operation failed");
                    Err(ClientError::operation(operation, context, other))
                }
            },
        }
    }

    /// Releases the transport. Errors while closing are logged, not raised.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.close().await {
                Ok(()) => info!(location = %self.location, "connection closed"),
                Err(err) => warn!(error = %err, "error closing connection"),
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.authenticated = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.transport.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connected: self.is_connected(),
            authenticated: self.authenticated,
            client_name: self.config.client_name.clone(),
            server_location: self.location.clone(),
        }
    }

    /// Lists the server's actions over the current session.
    pub async fn list_actions(&mut self) -> Result<Vec<String>, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let transport = self.transport.as_deref_mut().ok_or(ClientError::NotConnected)?;
        match transport.list_actions().await {
            Ok(actions) => Ok(actions.into_iter().map(|a| a.r#type).collect()),
            Err(err) => Err(transport_failure(&self.location, err)),
        }
    }

    /// Guards a CRUD call: connected first, then permitted.
    fn session(
        &mut self,
        operation: OperationKind,
        context: &str,
    ) -> Result<&mut dyn FlightTransport, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if !self.config.allows(operation) {
            warn!(%operation, "operation not in allowed_operations");
            return Err(ClientError::operation(
                operation,
                context,
                format!(
                    "{} is not permitted by allowed_operations",
                    operation.verb()
                ),
            ));
        }
        match self.transport.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(ClientError::NotConnected),
        }
    }

    fn operation_failure(
        &self,
        operation: OperationKind,
        context: String,
        err: TransportError,
    ) -> ClientError {
        operation_failure(&self.location, &self.connected, operation, context, err)
    }
}

/// Probes the server and authenticates when it asks for credentials.
/// Returns whether a handshake took place.
async fn detect_and_authenticate(
    config: &ClientConfig,
    location: &str,
    transport: &mut dyn FlightTransport,
    api_key: &str,
) -> Result<bool, ClientError> {
    let failure = match transport.list_actions().await {
        Ok(actions) => {
            info!(
                actions = actions.len(),
                "server does not require authentication"
            );
            return Ok(false);
        }
        Err(err) => err,
    };

    match classify_probe_failure(&failure) {
        Some(ProbeOutcome::AuthRequired) => {
            info!(reason = %failure, "server requires authentication");
            handshake(config, location, transport, api_key).await?;
            Ok(true)
        }
        Some(ProbeOutcome::NoAuthLayer) => {
            info!(reason = %failure, "server has no authentication layer");
            Ok(false)
        }
        None => {
            error!(error = %failure, "authentication probe failed");
            Err(transport_failure(location, failure))
        }
    }
}

async fn handshake(
    config: &ClientConfig,
    location: &str,
    transport: &mut dyn FlightTransport,
    api_key: &str,
) -> Result<(), ClientError> {
    let client_name = config.client_name.as_str();
    info!(
        client = %client_name,
        api_key = %config.display_api_key(),
        "authenticating"
    );
    match transport.authenticate_basic(client_name, api_key).await {
        Ok(()) => {
            info!(client = %client_name, "authentication succeeded");
            Ok(())
        }
        Err(err) if err.is_unreachable() => Err(transport_failure(location, err)),
        Err(err) => {
            let kind = classify_auth_failure(&err);
            error!(client = %client_name, %kind, error = %err, "authentication failed");
            Err(ClientError::Authentication {
                kind,
                client_name: client_name.to_string(),
                message: err.to_string(),
            })
        }
    }
}

/// Wraps a failed call. An unreachable server also drops the session so
/// the next caller reconnects.
fn operation_failure(
    location: &str,
    connected: &AtomicBool,
    operation: OperationKind,
    context: String,
    err: TransportError,
) -> ClientError {
    if err.is_unreachable() {
        connected.store(false, Ordering::SeqCst);
        return transport_failure(location, err);
    }
    error!(%operation, error = %err, "operation failed");
    ClientError::operation(operation, context, err)
}

fn transport_failure(location: &str, err: TransportError) -> ClientError {
    if err.is_unreachable() {
        error!(%location, error = %err, "Arrow Flight server is not running");
        ClientError::ServerNotRunning {
            location: location.to_string(),
            message: err.to_string(),
        }
    } else {
        ClientError::Transport(err)
    }
}

fn rows_context(batch: &RecordBatch, table_name: &str) -> String {
    format!("{} rows -> '{table_name}'", batch.num_rows())
}

fn query_context(query: &str) -> String {
    let preview: String = query.chars().take(QUERY_PREVIEW_CHARS).collect();
    if preview.len() < query.len() {
        format!("{preview}...")
    } else {
        preview
    }
}
