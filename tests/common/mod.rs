//! In-process Arrow Flight server used by the integration tests.
//!
//! Keeps inserted batches per table, answers `SELECT * FROM <table>` tickets
//! from them, and applies the `update`/`delete` actions by counting the rows
//! carried in the envelope.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use a2flight_client::codec::{decode_batch, encode_batch};
use a2flight_client::ClientConfig;
use arrow_array::{BinaryArray, BooleanArray, Int64Array, RecordBatch, StringArray};
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use arrow_schema::{DataType, Field, Schema};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt, TryStreamExt};
use tokio::sync::oneshot;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

pub const CLIENT_NAME: &str = "etl";
pub const API_KEY: &str = "a2db_key_test_0123456789abcdefghij";
const TOKEN: &str = "session-token-1";

type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// How the server treats credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Every call is accepted anonymously.
    Open,
    /// Calls need the bearer token issued by the handshake.
    Required,
    /// Introspection reports a missing authentication subsystem.
    Disabled,
}

#[derive(Default)]
pub struct ServerState {
    pub tables: HashMap<String, Vec<RecordBatch>>,
    pub handshakes: usize,
    pub actions: Vec<(String, String, usize)>,
}

#[derive(Clone)]
struct ScriptedFlightService {
    mode: AuthMode,
    state: Arc<Mutex<ServerState>>,
}

impl ScriptedFlightService {
    fn check_token(&self, metadata: &MetadataMap) -> Result<(), Status> {
        if self.mode != AuthMode::Required {
            return Ok(());
        }
        let expected = format!("Bearer {TOKEN}");
        match metadata.get("authorization").map(|v| v.to_str()) {
            Some(Ok(value)) if value == expected => Ok(()),
            _ => Err(Status::unauthenticated("Unauthenticated: missing or invalid bearer token")),
        }
    }

    fn into_stream<T: Send + 'static>(items: Vec<T>) -> BoxedStream<T> {
        Box::pin(stream::iter(items.into_iter().map(Ok)))
    }
}

#[tonic::async_trait]
impl FlightService for ScriptedFlightService {
    type HandshakeStream = BoxedStream<HandshakeResponse>;
    type ListFlightsStream = BoxedStream<FlightInfo>;
    type DoGetStream = BoxedStream<FlightData>;
    type DoPutStream = BoxedStream<PutResult>;
    type DoActionStream = BoxedStream<arrow_flight::Result>;
    type ListActionsStream = BoxedStream<ActionType>;
    type DoExchangeStream = BoxedStream<FlightData>;

    async fn handshake(
        &self,
        request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        self.state.lock().unwrap().handshakes += 1;
        let expected = format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{CLIENT_NAME}:{API_KEY}"))
        );
        let header = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if header != expected {
            return Err(Status::unauthenticated(format!(
                "Invalid API key for client '{CLIENT_NAME}'"
            )));
        }

        let mut response = Response::new(Self::into_stream(vec![HandshakeResponse {
            protocol_version: 0,
            payload: Bytes::from_static(TOKEN.as_bytes()),
        }]));
        let value = MetadataValue::try_from(format!("Bearer {TOKEN}"))
            .map_err(|e| Status::internal(e.to_string()))?;
        response.metadata_mut().insert("authorization", value);
        Ok(response)
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("list_flights"))
    }

    async fn get_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("get_flight_info"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info"))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("get_schema"))
    }

    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        self.check_token(request.metadata())?;
        let query = String::from_utf8(request.into_inner().ticket.to_vec())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let table = query
            .strip_prefix("SELECT * FROM ")
            .ok_or_else(|| Status::invalid_argument(format!("unsupported query: {query}")))?;
        let batches = self
            .state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("table '{table}' does not exist")))?;

        let stream: Self::DoGetStream = Box::pin(
            FlightDataEncoderBuilder::new()
                .build(stream::iter(batches.into_iter().map(Ok)))
                .map_err(Status::from),
        );
        Ok(Response::new(stream))
    }

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        self.check_token(request.metadata())?;
        let mut incoming = request.into_inner();
        let first = incoming
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("empty do_put stream"))?;
        let table = first
            .flight_descriptor
            .as_ref()
            .and_then(|d| d.path.first().cloned())
            .ok_or_else(|| Status::invalid_argument("do_put without descriptor path"))?;

        let messages = stream::once(async move { Ok(first) }).chain(incoming);
        let batches: Vec<RecordBatch> =
            FlightRecordBatchStream::new_from_flight_data(messages.map_err(FlightError::from))
                .try_collect()
                .await
                .map_err(Status::from)?;

        self.state
            .lock()
            .unwrap()
            .tables
            .entry(table)
            .or_default()
            .extend(batches);
        Ok(Response::new(Self::into_stream(vec![PutResult {
            app_metadata: Bytes::new(),
        }])))
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        self.check_token(request.metadata())?;
        let action = request.into_inner();
        if action.r#type != "update" && action.r#type != "delete" {
            return Err(Status::unimplemented(format!("unknown action {}", action.r#type)));
        }

        let envelope =
            decode_batch(&action.body).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let table = envelope
            .column_by_name("table_name")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .map(|c| c.value(0).to_string())
            .ok_or_else(|| Status::invalid_argument("envelope without table_name"))?;
        let data = envelope
            .column_by_name("data")
            .and_then(|c| c.as_any().downcast_ref::<BinaryArray>())
            .map(|c| c.value(0).to_vec())
            .ok_or_else(|| Status::invalid_argument("envelope without data"))?;
        let payload = decode_batch(&data).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let rows = payload.num_rows();
        self.state
            .lock()
            .unwrap()
            .actions
            .push((action.r#type.clone(), table, rows));

        let mut fields = vec![
            Field::new("success", DataType::Boolean, false),
            Field::new("rows_affected", DataType::Int64, false),
        ];
        let mut columns: Vec<arrow_array::ArrayRef> = vec![
            Arc::new(BooleanArray::from(vec![true])),
            Arc::new(Int64Array::from(vec![rows as i64])),
        ];
        if action.r#type == "update" {
            fields.push(Field::new("method_used", DataType::Utf8, true));
            columns.push(Arc::new(StringArray::from(vec!["staged_merge"])));
        }
        let response = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .and_then(|batch| encode_batch(&batch))
            .map_err(|e| Status::internal(e.to_string()))?;

        // Split the body so the client has to reassemble it.
        let (head, tail) = response.split_at(response.len() / 2);
        Ok(Response::new(Self::into_stream(vec![
            arrow_flight::Result {
                body: Bytes::copy_from_slice(head),
            },
            arrow_flight::Result {
                body: Bytes::copy_from_slice(tail),
            },
        ])))
    }

    async fn list_actions(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        if self.mode == AuthMode::Disabled {
            return Err(Status::unimplemented(
                "Authentication is not implemented on this server",
            ));
        }
        self.check_token(request.metadata())?;
        Ok(Response::new(Self::into_stream(vec![
            ActionType {
                r#type: "update".to_string(),
                description: "apply rows by key".to_string(),
            },
            ActionType {
                r#type: "delete".to_string(),
                description: "remove rows by key".to_string(),
            },
        ])))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange"))
    }
}

/// A running server; shuts down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<ServerState>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(mode: AuthMode) -> Self {
        let addr = free_local_addr();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let service = ScriptedFlightService {
            mode,
            state: state.clone(),
        };
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            Server::builder()
                .add_service(FlightServiceServer::new(service))
                .serve_with_shutdown(addr, async {
                    let _ = rx.await;
                })
                .await
                .expect("test flight server failed");
        });
        wait_for_listener(addr).await;

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    /// Client config pointing at this server.
    pub fn config(&self, api_key: Option<&str>) -> ClientConfig {
        ClientConfig {
            client_name: CLIENT_NAME.to_string(),
            api_key: api_key
                .unwrap_or(a2flight_client::config::UNSET_API_KEY)
                .to_string(),
            server_host: self.addr.ip().to_string(),
            server_port: self.addr.port(),
            ..ClientConfig::default()
        }
    }

    pub fn handshakes(&self) -> usize {
        self.state.lock().unwrap().handshakes
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// A loopback address nobody is listening on.
pub fn free_local_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}

async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("test flight server did not start on {addr}");
}
