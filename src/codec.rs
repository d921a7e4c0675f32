//! Arrow IPC stream codec and the update/delete action envelope.
//!
//! Every payload that travels inside a Flight action body is a complete IPC
//! stream: schema message, record batches, end-of-stream marker. Decoding
//! therefore never needs out-of-band schema information.

use std::io::Cursor;
use std::sync::Arc;

use arrow_array::{Array, BinaryArray, RecordBatch, StringArray};
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use arrow_select::concat::concat_batches;

pub const ENVELOPE_TABLE_NAME: &str = "table_name";
pub const ENVELOPE_DATA: &str = "data";

/// Encodes `batches` as one IPC stream with `schema` up front.
pub fn encode_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<Vec<u8>, ArrowError> {
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buffer, schema)?;
        for batch in batches {
            writer.write(batch)?;
        }
        writer.finish()?;
    }
    Ok(buffer)
}

pub fn encode_batch(batch: &RecordBatch) -> Result<Vec<u8>, ArrowError> {
    encode_batches(batch.schema().as_ref(), std::slice::from_ref(batch))
}

/// Decodes an IPC stream into its schema and batches.
pub fn decode_batches(bytes: &[u8]) -> Result<(SchemaRef, Vec<RecordBatch>), ArrowError> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
    let schema = reader.schema();
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

/// Decodes an IPC stream and concatenates it into a single batch.
pub fn decode_batch(bytes: &[u8]) -> Result<RecordBatch, ArrowError> {
    let (schema, batches) = decode_batches(bytes)?;
    concat_batches(&schema, &batches)
}

/// Two-field wrapper used to carry a table name and an encoded batch through
/// a generic Flight action.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ActionEnvelope {
    pub table_name: String,
    pub data: Vec<u8>,
}

impl ActionEnvelope {
    pub fn new(table_name: &str, payload: &RecordBatch) -> Result<Self, ArrowError> {
        Ok(Self {
            table_name: table_name.to_string(),
            data: encode_batch(payload)?,
        })
    }

    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new(ENVELOPE_TABLE_NAME, DataType::Utf8, true),
            Field::new(ENVELOPE_DATA, DataType::Binary, true),
        ]))
    }

    pub fn to_batch(&self) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(StringArray::from(vec![self.table_name.as_str()])),
                Arc::new(BinaryArray::from(vec![self.data.as_slice()])),
            ],
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, ArrowError> {
        encode_batch(&self.to_batch()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ArrowError> {
        let batch = decode_batch(bytes)?;
        if batch.num_rows() != 1 {
            return Err(ArrowError::InvalidArgumentError(format!(
                "envelope must hold exactly one row, found {}",
                batch.num_rows()
            )));
        }
        let table_name = batch
            .column_by_name(ENVELOPE_TABLE_NAME)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .filter(|c| !c.is_null(0))
            .ok_or_else(|| missing_field(ENVELOPE_TABLE_NAME))?
            .value(0)
            .to_string();
        let data = batch
            .column_by_name(ENVELOPE_DATA)
            .and_then(|c| c.as_any().downcast_ref::<BinaryArray>())
            .filter(|c| !c.is_null(0))
            .ok_or_else(|| missing_field(ENVELOPE_DATA))?
            .value(0)
            .to_vec();
        Ok(Self { table_name, data })
    }

    /// Decodes the carried batch.
    pub fn payload(&self) -> Result<RecordBatch, ArrowError> {
        decode_batch(&self.data)
    }
}

fn missing_field(name: &str) -> ArrowError {
    ArrowError::SchemaError(format!("envelope field '{name}' missing or not set"))
}
