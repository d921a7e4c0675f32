//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use arrow_array::RecordBatch;
use arrow_flight::{Action, ActionType, FlightDescriptor, Ticket};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use tonic::Status;

use super::{
    ActionResultStream, Connector, FlightTransport, RecordBatchStream, TransportError,
};

#[derive(Debug, Clone)]
pub(crate) struct RecordedPut {
    pub descriptor: FlightDescriptor,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

#[derive(Default)]
pub(crate) struct MockState {
    pub open_calls: usize,
    pub list_actions_calls: usize,
    pub authenticate_calls: Vec<(String, String)>,
    pub close_calls: usize,
    pub puts: Vec<RecordedPut>,
    pub tickets: Vec<Ticket>,
    pub actions: Vec<Action>,

    pub open_error: Option<fn() -> TransportError>,
    pub probe_errors: VecDeque<Status>,
    pub auth_error: Option<Status>,
    pub put_error: Option<Status>,
    pub get_batches: Vec<RecordBatch>,
    /// Error yielded after `get_batches` on every DoGet stream.
    pub get_stream_error: Option<fn() -> TransportError>,
    pub action_chunks: Vec<Bytes>,
}

impl MockState {
    /// Total number of calls that would have hit the network.
    pub fn network_calls(&self) -> usize {
        self.open_calls
            + self.list_actions_calls
            + self.authenticate_calls.len()
            + self.puts.len()
            + self.tickets.len()
            + self.actions.len()
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(&self, f: impl FnOnce(&mut MockState)) -> &Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&MockState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _location: &str) -> Result<Box<dyn FlightTransport>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.open_calls += 1;
        if let Some(make_error) = state.open_error {
            return Err(make_error());
        }
        Ok(Box::new(MockTransport {
            state: self.state.clone(),
        }))
    }
}

pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl FlightTransport for MockTransport {
    async fn list_actions(&mut self) -> Result<Vec<ActionType>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.list_actions_calls += 1;
        if let Some(status) = state.probe_errors.pop_front() {
            return Err(status.into());
        }
        Ok(vec![
            ActionType {
                r#type: "update".to_string(),
                description: "apply rows".to_string(),
            },
            ActionType {
                r#type: "delete".to_string(),
                description: "remove rows".to_string(),
            },
        ])
    }

    async fn authenticate_basic(
        &mut self,
        identity: &str,
        credential: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state
            .authenticate_calls
            .push((identity.to_string(), credential.to_string()));
        match state.auth_error.clone() {
            Some(status) => Err(status.into()),
            None => Ok(()),
        }
    }

    async fn do_put(
        &mut self,
        descriptor: FlightDescriptor,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.puts.push(RecordedPut {
            descriptor,
            schema,
            batches,
        });
        match state.put_error.clone() {
            Some(status) => Err(status.into()),
            None => Ok(()),
        }
    }

    async fn do_get(&mut self, ticket: Ticket) -> Result<RecordBatchStream, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.tickets.push(ticket);
        let mut items: Vec<_> = state.get_batches.iter().cloned().map(Ok).collect();
        if let Some(make_error) = state.get_stream_error {
            items.push(Err(make_error()));
        }
        Ok(stream::iter(items).boxed())
    }

    async fn do_action(&mut self, action: Action) -> Result<ActionResultStream, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.actions.push(action);
        let chunks = state.action_chunks.clone();
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().unwrap().close_calls += 1;
        Ok(())
    }
}
