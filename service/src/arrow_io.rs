use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use scan_parser::{Node, NodeValue};
use std::sync::Arc;

pub const ARROW_STREAM_CONTENT_TYPE: &str = "application/vnd.apache.arrow.stream";

/// One Float64 field per data column; unnamed columns are called `[i]`.
pub fn series_schema(headers: &[String], columns: usize) -> Arc<Schema> {
    let fields: Vec<Field> = (0..columns)
        .map(|i| {
            let name = headers
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("[{}]", i));
            Field::new(name, DataType::Float64, false)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

pub fn series_batch(headers: &[String], data: &[Vec<f64>]) -> Result<RecordBatch, ArrowError> {
    let schema = series_schema(headers, data.len());
    let row_count = data.first().map_or(0, Vec::len);

    let columns: Vec<ArrayRef> = data
        .iter()
        .map(|column| Arc::new(Float64Array::from(column.clone())) as ArrayRef)
        .collect();

    let options = RecordBatchOptions::new().with_row_count(Some(row_count));
    RecordBatch::try_new_with_options(schema, columns, &options)
}

/// Batch for a scan data node, `None` for any other node kind.
pub fn node_batch(node: &Node) -> Result<Option<RecordBatch>, ArrowError> {
    match &node.value {
        NodeValue::ScanData { headers, data, .. } => series_batch(headers, data).map(Some),
        _ => Ok(None),
    }
}

pub fn write_stream(batch: &RecordBatch) -> Result<Vec<u8>, ArrowError> {
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buffer, &batch.schema())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(buffer)
}
