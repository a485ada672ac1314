//! Flat parquet report of assessments.
//!
//! One row per assessment. The outcome is its string tag; list and request
//! columns hold JSON text so the file stays readable from DuckDB or pandas
//! without nested types.
//!
//! The column set is the contract for downstream notebooks. Add columns as
//! nullable; never rename.

use std::io::{Cursor, Write};
use std::sync::Arc;

use arrow::array::{Array as _, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::error::{Error, Result};
use crate::model::Assessment;

/// Columns of the report, in file order.
pub const COLUMNS: &[&str] = &[
    "collection_concept_id",
    "granule_id",
    "data_url",
    "format",
    "extension",
    "backend",
    "data_variables",
    "data_centers",
    "tile_request",
    "tiles_url",
    "outcome",
    "detail",
];

/// Returns the report schema. Only the concept id is non-nullable.
#[must_use]
pub fn report_schema() -> Arc<Schema> {
    Arc::new(Schema::new(
        COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, *name != "collection_concept_id"))
            .collect::<Vec<_>>(),
    ))
}

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("tilecheck-flow".to_string()),
    };
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

fn json_list(values: &[String]) -> Result<Option<String>> {
    if values.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(values)
        .map(Some)
        .map_err(|e| Error::export_with_source("failed to serialize list column", e))
}

fn string_column<'a>(rows: &'a [Assessment], f: impl Fn(&'a Assessment) -> Option<&'a str>) -> StringArray {
    StringArray::from(rows.iter().map(f).collect::<Vec<_>>())
}

/// Builds one record batch from `rows`.
///
/// # Errors
///
/// Returns an error if a JSON column cannot be serialized or the batch does
/// not match the schema.
pub fn record_batch(rows: &[Assessment]) -> Result<RecordBatch> {
    let variables = rows
        .iter()
        .map(|r| json_list(&r.data_variables))
        .collect::<Result<Vec<_>>>()?;
    let centers = rows
        .iter()
        .map(|r| json_list(&r.data_centers))
        .collect::<Result<Vec<_>>>()?;
    let requests = rows
        .iter()
        .map(|r| r.tile_request.as_ref().map(serde_json::to_string).transpose())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::export_with_source("failed to serialize tile request", e))?;

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(string_column(rows, |r| Some(r.collection_concept_id.as_str()))),
        Arc::new(string_column(rows, |r| r.granule_id.as_deref())),
        Arc::new(string_column(rows, |r| r.data_url.as_deref())),
        Arc::new(string_column(rows, |r| r.format.as_deref())),
        Arc::new(string_column(rows, |r| r.extension.as_deref())),
        Arc::new(string_column(rows, |r| r.backend.map(|b| b.as_label()))),
        Arc::new(StringArray::from(variables)),
        Arc::new(StringArray::from(centers)),
        Arc::new(StringArray::from(requests)),
        Arc::new(string_column(rows, |r| r.tiles_url.as_deref())),
        Arc::new(string_column(rows, |r| r.outcome.map(|o| o.as_label()))),
        Arc::new(string_column(rows, |r| r.detail.as_deref())),
    ];

    RecordBatch::try_new(report_schema(), columns)
        .map_err(|e| Error::export_with_source("record batch build failed", e))
}

/// Encodes `rows` as a single-row-group parquet file.
///
/// # Errors
///
/// Returns an error if parquet serialization fails.
pub fn write_report(rows: &[Assessment]) -> Result<Bytes> {
    let mut writer = ReportWriter::new(Cursor::new(Vec::<u8>::new()))?;
    writer.append(rows)?;
    let (cursor, _) = writer.finish_into_inner()?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Incremental report writer. Each [`append`](Self::append) becomes one row
/// group, so memory stays bounded by one page.
///
/// The file is unreadable until [`finish`](Self::finish) writes the footer;
/// an interrupted run leaves no usable report. Per-page durability comes from
/// the result store, and `export` rebuilds the report from it.
pub struct ReportWriter<W: Write + Send> {
    inner: ArrowWriter<W>,
    rows: usize,
}

impl<W: Write + Send> std::fmt::Debug for ReportWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportWriter")
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl ReportWriter<std::fs::File> {
    /// Creates (or truncates) a report file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .map_err(|e| Error::export_with_source(format!("cannot create {}", path.display()), e))?;
        Self::new(file)
    }
}

impl<W: Write + Send> ReportWriter<W> {
    /// Wraps a sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the parquet writer cannot be initialized.
    pub fn new(sink: W) -> Result<Self> {
        let inner = ArrowWriter::try_new(sink, report_schema(), Some(writer_properties()))
            .map_err(|e| Error::export_with_source("parquet writer init failed", e))?;
        Ok(Self { inner, rows: 0 })
    }

    /// Appends `rows` as one row group. Empty slices are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or flushing fails.
    pub fn append(&mut self, rows: &[Assessment]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let batch = record_batch(rows)?;
        self.inner
            .write(&batch)
            .map_err(|e| Error::export_with_source("parquet write failed", e))?;
        self.inner
            .flush()
            .map_err(|e| Error::export_with_source("parquet flush failed", e))?;
        self.rows += rows.len();
        Ok(())
    }

    /// Rows written so far.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Writes the footer and returns the number of rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer cannot be written.
    pub fn finish(self) -> Result<usize> {
        self.finish_into_inner().map(|(_, rows)| rows)
    }

    fn finish_into_inner(self) -> Result<(W, usize)> {
        let rows = self.rows;
        let sink = self
            .inner
            .into_inner()
            .map_err(|e| Error::export_with_source("parquet close failed", e))?;
        Ok((sink, rows))
    }
}

/// A report row read back from parquet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    /// Collection concept id.
    pub collection_concept_id: String,
    /// Sampled granule, if any.
    pub granule_id: Option<String>,
    /// Backend label.
    pub backend: Option<String>,
    /// Outcome tag, or `None` when unprobed.
    pub outcome: Option<String>,
    /// Failure detail.
    pub detail: Option<String>,
}

fn read_batches(bytes: &Bytes) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(|e| Error::export_with_source("parquet reader init failed", e))?
        .build()
        .map_err(|e| Error::export_with_source("parquet reader build failed", e))?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.map_err(|e| Error::export_with_source("parquet read batch failed", e))?);
    }
    Ok(batches)
}

fn col_string<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|e| Error::export_with_source(format!("missing column '{name}'"), e))?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::export(format!("column '{name}' is not StringArray")))
}

fn value(col: &StringArray, row: usize) -> Option<String> {
    (!col.is_null(row)).then(|| col.value(row).to_string())
}

/// Reads the identity and outcome columns of a report.
///
/// # Errors
///
/// Returns an error if the bytes are not a report file.
pub fn read_report(bytes: &Bytes) -> Result<Vec<ReportRecord>> {
    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let ids = col_string(&batch, "collection_concept_id")?;
        let granules = col_string(&batch, "granule_id")?;
        let backends = col_string(&batch, "backend")?;
        let outcomes = col_string(&batch, "outcome")?;
        let details = col_string(&batch, "detail")?;
        for row in 0..batch.num_rows() {
            out.push(ReportRecord {
                collection_concept_id: ids.value(row).to_string(),
                granule_id: value(granules, row),
                backend: value(backends, row),
                outcome: value(outcomes, row),
                detail: value(details, row),
            });
        }
    }
    Ok(out)
}
