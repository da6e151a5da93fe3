//! Parquet encoding of record sets.
//!
//! Schemas are inferred from the records themselves. Columns that are null in
//! every row have no type of their own and are written as nullable strings.

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::json::reader::{ReaderBuilder, infer_json_schema_from_iterator};
use arrow::json::writer::{JsonArray, WriterBuilder};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use floe_core::{ParquetCompression, Record};

use crate::error::{ArrowSnafu, EmptyRecordSetSnafu, EncodeError, ParquetSnafu, RowJsonSnafu};

/// Rows handed to the Arrow decoder per batch.
const BATCH_SIZE: usize = 8192;

/// Infer a schema for `records`, typing all-null columns as `Utf8`.
pub fn infer_schema(records: &[Record]) -> Result<SchemaRef, EncodeError> {
    let values = records
        .iter()
        .map(|r| Ok::<_, arrow::error::ArrowError>(serde_json::Value::Object(r.clone())));
    let schema = infer_json_schema_from_iterator(values).context(ArrowSnafu)?;
    Ok(coerce_schema(&schema))
}

fn coerce_schema(schema: &Schema) -> SchemaRef {
    let fields: Vec<FieldRef> = schema
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Null => Arc::new(Field::new(f.name(), DataType::Utf8, true)),
            _ => f.clone(),
        })
        .collect();

    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(match compression {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        })
        .build()
}

/// Encode `records` as a single Parquet file.
///
/// Fails with [`EncodeError::EmptyRecordSet`] when there is nothing to write.
pub fn encode_parquet(
    records: &[Record],
    compression: ParquetCompression,
) -> Result<Bytes, EncodeError> {
    ensure!(!records.is_empty(), EmptyRecordSetSnafu);

    let schema = infer_schema(records)?;
    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(BATCH_SIZE)
        .with_coerce_primitive(true)
        .build_decoder()
        .context(ArrowSnafu)?;
    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(writer_properties(compression)))
        .context(ParquetSnafu)?;

    for chunk in records.chunks(BATCH_SIZE) {
        decoder.serialize(chunk).context(ArrowSnafu)?;
        if let Some(batch) = decoder.flush().context(ArrowSnafu)? {
            writer.write(&batch).context(ParquetSnafu)?;
        }
    }

    let buffer = writer.into_inner().context(ParquetSnafu)?;
    debug!(
        rows = records.len(),
        bytes = buffer.len(),
        "Encoded parquet"
    );
    Ok(Bytes::from(buffer))
}

/// Decode a Parquet file back into records.
///
/// Nulls are kept as explicit `null` values.
pub fn decode_parquet(bytes: Bytes) -> Result<Vec<Record>, EncodeError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .context(ParquetSnafu)?
        .with_batch_size(BATCH_SIZE)
        .build()
        .context(ParquetSnafu)?;
    let batches = reader
        .collect::<Result<Vec<RecordBatch>, _>>()
        .context(ArrowSnafu)?;
    if batches.is_empty() {
        return Ok(Vec::new());
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs).context(ArrowSnafu)?;
    writer.finish().context(ArrowSnafu)?;

    serde_json::from_slice(&writer.into_inner()).context(RowJsonSnafu)
}
