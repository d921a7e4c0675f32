//! Transport seam between the connection manager and Arrow Flight.
//!
//! [`FlightTransport`] is the set of Flight primitives the client consumes;
//! [`Connector`] opens one for a location. The production implementation
//! lives in [`grpc`]; tests substitute scripted transports.

use arrow_array::RecordBatch;
use arrow_flight::error::FlightError;
use arrow_flight::{Action, ActionType, FlightDescriptor, Ticket};
use arrow_schema::{ArrowError, SchemaRef};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tonic::{Code, Status};

pub mod grpc;
#[cfg(test)]
pub(crate) mod mock;

pub use grpc::{GrpcConnector, GrpcTransport};

/// Lazily decoded record batches from a DoGet call.
pub type RecordBatchStream = BoxStream<'static, Result<RecordBatch, TransportError>>;

/// Raw body chunks from a DoAction call, in arrival order.
pub type ActionResultStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {location}: {message}")]
    Connect { location: String, message: String },

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("invalid request metadata: {0}")]
    InvalidMetadata(String),

    #[error("{}", format_status(.0))]
    Status(#[from] Status),

    #[error("flight error: {0}")]
    Flight(#[from] FlightError),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

fn format_status(status: &Status) -> String {
    format!("{:?}: {}", status.code(), status.message())
}

impl TransportError {
    /// gRPC status code carried by this error, if it came off the wire.
    pub fn code(&self) -> Option<Code> {
        match self {
            TransportError::Status(status) => Some(status.code()),
            TransportError::Flight(FlightError::Tonic(status)) => Some(status.code()),
            _ => None,
        }
    }

    /// Whether the peer could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        if self.code() == Some(Code::Unavailable) {
            return true;
        }
        match self {
            TransportError::Connect { .. } => true,
            other => {
                let text = other.to_string().to_lowercase();
                text.contains("failed to connect") || text.contains("connection refused")
            }
        }
    }
}

/// Flight primitives consumed by the client.
///
/// One transport is one logical session: calls take `&mut self` and are
/// never issued concurrently on the same instance.
#[async_trait]
pub trait FlightTransport: Send {
    /// Cheap read-only introspection call, issued with whatever credentials
    /// the transport currently holds.
    async fn list_actions(&mut self) -> Result<Vec<ActionType>, TransportError>;

    /// Basic-credential handshake. On success the transport attaches the
    /// returned session token to every later call.
    async fn authenticate_basic(
        &mut self,
        identity: &str,
        credential: &str,
    ) -> Result<(), TransportError>;

    /// Opens a write stream to `descriptor`, sends `schema` followed by
    /// `batches`, and closes it. Returns once the server acknowledged.
    async fn do_put(
        &mut self,
        descriptor: FlightDescriptor,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<(), TransportError>;

    async fn do_get(&mut self, ticket: Ticket) -> Result<RecordBatchStream, TransportError>;

    async fn do_action(&mut self, action: Action) -> Result<ActionResultStream, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports for a location such as `grpc://localhost:50054`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, location: &str) -> Result<Box<dyn FlightTransport>, TransportError>;
}
