//! Scalar projections out of Arrow arrays.

use arrow_array::{
    Array, BinaryArray, BooleanArray, Date32Array, Date64Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, LargeBinaryArray, LargeStringArray,
    StringArray, TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow_schema::{ArrowError, DataType, TimeUnit};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

fn downcast<'a, T: 'static>(column: &'a dyn Array) -> Result<&'a T, ArrowError> {
    column.as_any().downcast_ref::<T>().ok_or_else(|| {
        ArrowError::CastError(format!(
            "column of type {} does not match its physical array",
            column.data_type()
        ))
    })
}

/// Render an Arrow value for display.
pub fn array_value_to_string(column: &dyn Array, row_idx: usize) -> Result<String, ArrowError> {
    if column.is_null(row_idx) {
        return Ok("NULL".to_string());
    }

    let rendered = match column.data_type() {
        DataType::Boolean => downcast::<BooleanArray>(column)?.value(row_idx).to_string(),
        DataType::Int8 => downcast::<Int8Array>(column)?.value(row_idx).to_string(),
        DataType::Int16 => downcast::<Int16Array>(column)?.value(row_idx).to_string(),
        DataType::Int32 => downcast::<Int32Array>(column)?.value(row_idx).to_string(),
        DataType::Int64 => downcast::<Int64Array>(column)?.value(row_idx).to_string(),
        DataType::UInt8 => downcast::<UInt8Array>(column)?.value(row_idx).to_string(),
        DataType::UInt16 => downcast::<UInt16Array>(column)?.value(row_idx).to_string(),
        DataType::UInt32 => downcast::<UInt32Array>(column)?.value(row_idx).to_string(),
        DataType::UInt64 => downcast::<UInt64Array>(column)?.value(row_idx).to_string(),
        DataType::Float32 => downcast::<Float32Array>(column)?.value(row_idx).to_string(),
        DataType::Float64 => downcast::<Float64Array>(column)?.value(row_idx).to_string(),
        DataType::Utf8 => downcast::<StringArray>(column)?.value(row_idx).to_string(),
        DataType::LargeUtf8 => downcast::<LargeStringArray>(column)?
            .value(row_idx)
            .to_string(),
        DataType::Binary => format!("{:?}", downcast::<BinaryArray>(column)?.value(row_idx)),
        DataType::LargeBinary => {
            format!("{:?}", downcast::<LargeBinaryArray>(column)?.value(row_idx))
        }
        DataType::Date32 => {
            let days = downcast::<Date32Array>(column)?.value(row_idx) as i64;
            NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(days)))
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| days.to_string())
        }
        DataType::Date64 => {
            let millis = downcast::<Date64Array>(column)?.value(row_idx);
            DateTime::<Utc>::from_timestamp_millis(millis)
                .map(|ts| ts.date_naive().format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| millis.to_string())
        }
        DataType::Timestamp(unit, _) => {
            let micros = match unit {
                TimeUnit::Second => downcast::<TimestampSecondArray>(column)?
                    .value(row_idx)
                    .saturating_mul(1_000_000),
                TimeUnit::Millisecond => downcast::<TimestampMillisecondArray>(column)?
                    .value(row_idx)
                    .saturating_mul(1_000),
                TimeUnit::Microsecond => {
                    downcast::<TimestampMicrosecondArray>(column)?.value(row_idx)
                }
                TimeUnit::Nanosecond => {
                    downcast::<TimestampNanosecondArray>(column)?.value(row_idx) / 1_000
                }
            };
            DateTime::<Utc>::from_timestamp_micros(micros)
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
                .unwrap_or_else(|| micros.to_string())
        }
        _ => format!("{:?}", column.slice(row_idx, 1)),
    };
    Ok(rendered)
}

/// Interpret a scalar Arrow value as i64.
pub fn value_as_i64(column: &dyn Array, idx: usize) -> Result<i64, ArrowError> {
    if column.is_null(idx) {
        return Err(null_value());
    }
    let value = match column.data_type() {
        DataType::Int64 => downcast::<Int64Array>(column)?.value(idx),
        DataType::Int32 => downcast::<Int32Array>(column)?.value(idx) as i64,
        DataType::Int16 => downcast::<Int16Array>(column)?.value(idx) as i64,
        DataType::Int8 => downcast::<Int8Array>(column)?.value(idx) as i64,
        DataType::UInt64 => {
            let value = downcast::<UInt64Array>(column)?.value(idx);
            i64::try_from(value).map_err(|_| {
                ArrowError::ComputeError(format!("value {value} does not fit in i64"))
            })?
        }
        DataType::UInt32 => downcast::<UInt32Array>(column)?.value(idx) as i64,
        DataType::UInt16 => downcast::<UInt16Array>(column)?.value(idx) as i64,
        DataType::UInt8 => downcast::<UInt8Array>(column)?.value(idx) as i64,
        other => {
            return Err(ArrowError::CastError(format!(
                "unsupported column type {other} for integer projection"
            )))
        }
    };
    Ok(value)
}

/// Interpret a scalar Arrow value as bool.
pub fn value_as_bool(column: &dyn Array, idx: usize) -> Result<bool, ArrowError> {
    if column.is_null(idx) {
        return Err(null_value());
    }
    match column.data_type() {
        DataType::Boolean => Ok(downcast::<BooleanArray>(column)?.value(idx)),
        other => Err(ArrowError::CastError(format!(
            "unsupported column type {other} for boolean projection"
        ))),
    }
}

/// Interpret a scalar Arrow value as string; NULL maps to `None`.
pub fn value_as_opt_string(column: &dyn Array, idx: usize) -> Result<Option<String>, ArrowError> {
    if column.is_null(idx) {
        return Ok(None);
    }
    match column.data_type() {
        DataType::Utf8 => Ok(Some(downcast::<StringArray>(column)?.value(idx).to_string())),
        DataType::LargeUtf8 => Ok(Some(
            downcast::<LargeStringArray>(column)?.value(idx).to_string(),
        )),
        other => Err(ArrowError::CastError(format!(
            "unsupported column type {other} for string projection"
        ))),
    }
}

fn null_value() -> ArrowError {
    ArrowError::InvalidArgumentError("value is NULL".to_string())
}
