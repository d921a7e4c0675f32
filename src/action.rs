//! Update/delete over Flight `DoAction`.
//!
//! Request body: an IPC stream holding one [`ActionEnvelope`] row whose
//! `data` cell is itself the IPC stream of the caller's batch.
//! Response body: an IPC stream, possibly split across several result
//! chunks, whose first row carries `success`, `rows_affected` and an
//! optional `method_used`.

use std::time::Instant;

use arrow_array::RecordBatch;
use arrow_flight::Action;
use arrow_schema::ArrowError;
use futures::TryStreamExt;
use tracing::{debug, info};

use crate::arrow::{value_as_bool, value_as_i64, value_as_opt_string};
use crate::codec::{decode_batches, ActionEnvelope};
use crate::result::OperationResult;
use crate::transport::{FlightTransport, TransportError};

pub const UPDATE_ACTION: &str = "update";
pub const DELETE_ACTION: &str = "delete";

/// Named actions carrying an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Update,
    Delete,
}

impl ActionKind {
    pub fn action_name(&self) -> &'static str {
        match self {
            ActionKind::Update => UPDATE_ACTION,
            ActionKind::Delete => DELETE_ACTION,
        }
    }
}

/// Fixed fields of an action response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActionResponse {
    pub success: bool,
    pub rows_affected: u64,
    pub method_used: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ActionError {
    #[error("failed to encode request: {0}")]
    Encode(ArrowError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to decode response: {0}")]
    Decode(ArrowError),
}

/// Builds the wire body for `kind` against `table_name`.
pub(crate) fn build_action(
    kind: ActionKind,
    table_name: &str,
    batch: &RecordBatch,
) -> Result<Action, ArrowError> {
    let envelope = ActionEnvelope::new(table_name, batch)?;
    let body = envelope.encode()?;
    debug!(
        action = kind.action_name(),
        table = %table_name,
        payload_bytes = envelope.data.len(),
        body_bytes = body.len(),
        "built action envelope"
    );
    Ok(Action::new(kind.action_name(), body))
}

/// Decodes the concatenated response body.
pub(crate) fn decode_response(bytes: &[u8]) -> Result<ActionResponse, ArrowError> {
    let (_, batches) = decode_batches(bytes)?;
    let batch = batches
        .iter()
        .find(|batch| batch.num_rows() > 0)
        .ok_or_else(|| ArrowError::InvalidArgumentError("action response has no rows".into()))?;

    let success_column = batch
        .column_by_name("success")
        .ok_or_else(|| ArrowError::SchemaError("action response lacks 'success'".into()))?;
    let rows_column = batch
        .column_by_name("rows_affected")
        .ok_or_else(|| ArrowError::SchemaError("action response lacks 'rows_affected'".into()))?;

    let success = value_as_bool(success_column.as_ref(), 0)?;
    let rows_affected = value_as_i64(rows_column.as_ref(), 0)?;
    let rows_affected = u64::try_from(rows_affected).map_err(|_| {
        ArrowError::InvalidArgumentError(format!(
            "rows_affected must be non-negative, got {rows_affected}"
        ))
    })?;
    let method_used = match batch.column_by_name("method_used") {
        Some(column) => value_as_opt_string(column.as_ref(), 0)?,
        None => None,
    };

    Ok(ActionResponse {
        success,
        rows_affected,
        method_used,
    })
}

/// Runs `kind` against `table_name` and decodes the server's verdict.
pub(crate) async fn execute(
    transport: &mut dyn FlightTransport,
    kind: ActionKind,
    table_name: &str,
    batch: &RecordBatch,
) -> Result<OperationResult, ActionError> {
    let started = Instant::now();
    let action = build_action(kind, table_name, batch).map_err(ActionError::Encode)?;

    let chunks = transport.do_action(action).await?;
    let body: Vec<u8> = chunks
        .try_fold(Vec::new(), |mut body, chunk| async move {
            body.extend_from_slice(&chunk);
            Ok(body)
        })
        .await?;
    debug!(response_bytes = body.len(), "collected action response");

    let response = decode_response(&body).map_err(ActionError::Decode)?;
    let result = OperationResult::new(
        response.success,
        response.rows_affected,
        started.elapsed(),
        response.method_used,
    );
    info!(
        action = kind.action_name(),
        table = %table_name,
        success = result.success,
        rows_affected = result.rows_affected,
        elapsed_ms = format!("{:.1}", result.execution_time_ms),
        "action complete"
    );
    Ok(result)
}
