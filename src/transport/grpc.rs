use arrow_array::RecordBatch;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{
    Action, ActionType, Empty, FlightData, FlightDescriptor, HandshakeRequest, HandshakeResponse,
    PutResult, Ticket,
};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::{stream, StreamExt, TryStreamExt};
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Request;
use tracing::debug;

use super::{ActionResultStream, Connector, FlightTransport, RecordBatchStream, TransportError};

/// Default gRPC message size limit (100 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

const AUTHORIZATION: &str = "authorization";
const BEARER_PREFIX: &str = "Bearer ";

/// Opens tonic channels to Flight servers.
///
/// # Example
///
/// ```rust,ignore
/// use a2flight_client::transport::{Connector, GrpcConnector};
///
/// let transport = GrpcConnector::new()
///     .with_max_message_size(64 * 1024 * 1024)
///     .open("grpc://localhost:50054")
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    max_message_size: usize,
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl GrpcConnector {
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Bound on both encoded and decoded gRPC messages.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn open(&self, location: &str) -> Result<Box<dyn FlightTransport>, TransportError> {
        let transport = GrpcTransport::connect(location, self.max_message_size).await?;
        Ok(Box::new(transport))
    }
}

/// Arrow Flight transport over a tonic channel.
pub struct GrpcTransport {
    client: FlightServiceClient<Channel>,
    token: Option<String>,
}

impl GrpcTransport {
    pub async fn connect(location: &str, max_message_size: usize) -> Result<Self, TransportError> {
        let uri = normalize_location(location)?;
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| TransportError::InvalidLocation(format!("{location}: {e}")))?;
        if uri.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| TransportError::InvalidLocation(format!("{location}: {e}")))?;
        }

        debug!(%location, "opening flight channel");
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| TransportError::Connect {
                location: location.to_string(),
                message: error_chain(&e),
            })?;

        let client = FlightServiceClient::new(channel)
            .max_decoding_message_size(max_message_size)
            .max_encoding_message_size(max_message_size);
        Ok(Self {
            client,
            token: None,
        })
    }

    /// Wraps `message` in a request carrying the session token, if any.
    fn request<T>(&self, message: T) -> Result<Request<T>, TransportError> {
        let mut request = Request::new(message);
        if let Some(token) = &self.token {
            let value = MetadataValue::try_from(format!("{BEARER_PREFIX}{token}"))
                .map_err(|e| TransportError::InvalidMetadata(e.to_string()))?;
            request.metadata_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl FlightTransport for GrpcTransport {
    async fn list_actions(&mut self) -> Result<Vec<ActionType>, TransportError> {
        let request = self.request(Empty {})?;
        let response = self.client.list_actions(request).await?;
        let actions = response.into_inner().try_collect::<Vec<_>>().await?;
        Ok(actions)
    }

    async fn authenticate_basic(
        &mut self,
        identity: &str,
        credential: &str,
    ) -> Result<(), TransportError> {
        let handshake = HandshakeRequest {
            protocol_version: 0,
            payload: Default::default(),
        };
        let mut request = Request::new(stream::iter(vec![handshake]));
        let basic = BASE64_STANDARD.encode(format!("{identity}:{credential}"));
        let value = MetadataValue::try_from(format!("Basic {basic}"))
            .map_err(|e| TransportError::InvalidMetadata(e.to_string()))?;
        request.metadata_mut().insert(AUTHORIZATION, value);

        let response = self.client.handshake(request).await?;
        let header_token = match response.metadata().get(AUTHORIZATION) {
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|e| TransportError::InvalidMetadata(e.to_string()))?;
                let token = value.strip_prefix(BEARER_PREFIX).ok_or_else(|| {
                    TransportError::InvalidMetadata(format!(
                        "expected bearer token in handshake response, got '{value}'"
                    ))
                })?;
                Some(token.to_string())
            }
            None => None,
        };
        let responses: Vec<HandshakeResponse> = response.into_inner().try_collect().await?;

        // Servers that do not set the header hand the token back as payload.
        let token = header_token.or_else(|| {
            responses
                .iter()
                .find(|r| !r.payload.is_empty())
                .and_then(|r| std::str::from_utf8(&r.payload).ok())
                .map(str::to_string)
        });
        debug!(has_token = token.is_some(), "handshake completed");
        self.token = token;
        Ok(())
    }

    async fn do_put(
        &mut self,
        descriptor: FlightDescriptor,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<(), TransportError> {
        let flight_data: Vec<FlightData> = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .with_flight_descriptor(Some(descriptor))
            .build(stream::iter(batches.into_iter().map(Ok)))
            .try_collect()
            .await?;
        debug!(messages = flight_data.len(), "encoded flight data for do_put");

        let request = self.request(stream::iter(flight_data))?;
        let response = self.client.do_put(request).await?;
        let acks: Vec<PutResult> = response.into_inner().try_collect().await?;
        debug!(acks = acks.len(), "do_put acknowledged");
        Ok(())
    }

    async fn do_get(&mut self, ticket: Ticket) -> Result<RecordBatchStream, TransportError> {
        let request = self.request(ticket)?;
        let response = self.client.do_get(request).await?;
        let stream = FlightRecordBatchStream::new_from_flight_data(
            response.into_inner().map_err(FlightError::from),
        )
        .map_err(TransportError::from);
        Ok(stream.boxed())
    }

    async fn do_action(&mut self, action: Action) -> Result<ActionResultStream, TransportError> {
        let request = self.request(action)?;
        let response = self.client.do_action(request).await?;
        let stream = response
            .into_inner()
            .map_ok(|result| result.body)
            .map_err(TransportError::from);
        Ok(stream.boxed())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // tonic channels close when the last clone is dropped.
        self.token = None;
        Ok(())
    }
}

/// Maps Flight location schemes onto the URI schemes tonic understands.
pub fn normalize_location(location: &str) -> Result<String, TransportError> {
    if let Some(rest) = location.strip_prefix("grpc://") {
        return Ok(format!("http://{rest}"));
    }
    if let Some(rest) = location.strip_prefix("grpc+tcp://") {
        return Ok(format!("http://{rest}"));
    }
    if let Some(rest) = location.strip_prefix("grpc+tls://") {
        return Ok(format!("https://{rest}"));
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }

    Err(TransportError::InvalidLocation(format!(
        "unsupported location scheme: {location}"
    )))
}

/// tonic's transport error hides the interesting part in its source chain.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
