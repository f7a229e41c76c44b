//! Batch processing of extraction work records.
//!
//! Work arrives as a stream of `{id, path}` records and leaves as a stream
//! of result records, processed with bounded concurrency and backpressure:
//! the output stream is resolved with `buffered(jobs)`, which both limits
//! in-flight documents and preserves input order. One corrupt document must
//! never abort a batch, so per-document failures become failed records, and
//! the batch as a whole fails only when the failure rate exceeds the
//! configured budget.

use std::sync::{Arc, Mutex};

use futures::StreamExt as _;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::{
    async_utils::{
        BoxedStream,
        io::{read_jsonl_or_csv, write_output},
    },
    cmd::StreamOpts,
    engine::{OcrEngine, result::ExtractionResult},
    prelude::*,
    ui::Ui,
};

/// Input record for a batch run.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkInput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// The input data for the work item.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkInput<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Convert from a JSON value to the input type.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value).context("failed to deserialize input")
    }

    /// Read a stream from a [`Path`] or from standard input.
    pub async fn read_stream(
        ui: Ui,
        path: Option<&Path>,
    ) -> Result<BoxedStream<Result<Self>>> {
        Ok(read_jsonl_or_csv(ui, path)
            .await?
            .map(|value| Self::from_json(value?))
            .boxed())
    }
}

/// A document to extract.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ExtractInput {
    /// The path to the image or PDF file.
    pub path: PathBuf,
}

/// Output status of a work item.
#[derive(Clone, Copy, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    // The work item was successful.
    Ok,

    // The work item failed.
    Failed,
}

/// Output record from a batch run.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct WorkOutput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// What is the status of this work item?
    pub status: WorkStatus,

    /// Any non-fatal warnings (or, for failed records, errors) that
    /// occurred during processing.
    pub errors: Vec<String>,

    /// The output data for the work item.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkOutput<T>
where
    T: Clone + Serialize + Send + 'static,
{
    /// Convert from the output type to a JSON value.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value::<Self>((*self).to_owned())
            .context("failed to serialize output")
    }

    /// Write a stream of outputs to a [`Path`] or to standard output.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        stream: BoxedStream<Result<Self>>,
        stream_opts: &StreamOpts,
    ) -> Result<()> {
        let (stream, counters) = WorkOutputCounters::wrap_stream(stream);
        let output = stream
            .map(|value| {
                let value = value?;
                value.to_json()
            })
            .boxed();
        write_output(path, output).await?;
        counters.finish(ui, stream_opts)
    }
}

/// The record type produced by `extract`.
pub type ExtractOutput = WorkOutput<ExtractionResult>;

/// Extract one work record. This is where per-document failures are
/// converted into failed records instead of batch errors.
#[instrument(level = "debug", skip_all, fields(id = %input.id))]
pub async fn extract_one(
    engine: Arc<OcrEngine>,
    input: WorkInput<ExtractInput>,
) -> ExtractOutput {
    let result = engine.extract(&input.data.path).await;
    debug!(
        method = %result.method(),
        boxes = result.bounding_boxes.len(),
        "document processed"
    );

    let mut errors = vec![];
    let status = if result.success {
        // Low confidence is a quality warning for the caller (route to
        // manual review, for example), not a failure.
        let threshold = engine.options().low_confidence_threshold;
        if result.confidence * 100.0 < threshold {
            errors.push(format!(
                "low confidence: {:.1}% is below the {:.0}% threshold",
                result.confidence * 100.0,
                threshold,
            ));
        }
        WorkStatus::Ok
    } else {
        if let Some(error) = &result.error {
            errors.push(error.clone());
        }
        WorkStatus::Failed
    };

    WorkOutput {
        id: input.id,
        status,
        errors,
        data: result,
    }
}

/// Counters associated with a batch run.
#[derive(Clone, Debug, Default)]
pub struct WorkOutputCounters {
    /// How many records did we process?
    pub total_record_count: usize,

    /// How many records did we fail to process?
    pub failure_count: usize,

    /// How many non-fatal warnings did we encounter?
    pub warning_count: usize,
}

impl WorkOutputCounters {
    /// Wrap a stream with counters.
    pub fn wrap_stream<T>(
        stream: BoxedStream<Result<WorkOutput<T>>>,
    ) -> (
        BoxedStream<Result<WorkOutput<T>>>,
        Arc<Mutex<WorkOutputCounters>>,
    ) {
        let counters = Arc::new(Mutex::new(Self::default()));
        let counters_clone = counters.clone();
        let stream = stream
            .map(move |value| {
                let value = value?;
                counters_clone.update(&value);
                Ok(value)
            })
            .boxed();
        (stream, counters)
    }
}

/// We actually want to put methods on `Mutex<WorkOutputCounters>`, because
/// that's the type we work with. To do that, we need an extension trait.
pub trait WorkOutputCounterExt {
    /// Update counters for a work item.
    fn update<T>(&self, item: &WorkOutput<T>);

    /// Display counter values to the user, and enforce the failure budget.
    fn finish(self: Arc<Self>, ui: &Ui, stream_opts: &StreamOpts) -> Result<()>;
}

impl WorkOutputCounterExt for Mutex<WorkOutputCounters> {
    fn update<T>(&self, item: &WorkOutput<T>) {
        // Hold a sync lock, but just for an instant to update counters.
        let mut counters = self.lock().expect("lock poisoned");
        counters.total_record_count += 1;
        if item.status != WorkStatus::Ok {
            counters.failure_count += 1;
        } else if !item.errors.is_empty() {
            counters.warning_count += item.errors.len();
        }
    }

    fn finish(self: Arc<Self>, ui: &Ui, stream_opts: &StreamOpts) -> Result<()> {
        let counters = self.lock().expect("lock poisoned").to_owned();
        let failure_rate = if counters.total_record_count > 0 {
            counters.failure_count as f32 / counters.total_record_count as f32
        } else {
            0.0
        };
        if failure_rate > stream_opts.allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of outputs were failures, but only {:.2}% were allowed",
                counters.failure_count,
                counters.total_record_count,
                failure_rate * 100.0,
                stream_opts.allowed_failure_rate * 100.0
            ))
        } else {
            if counters.warning_count > 0 {
                ui.display_message(
                    "⚠️",
                    &format!("{} warnings encountered", counters.warning_count),
                );
            }
            if counters.failure_count > 0 {
                ui.display_message(
                    "❌",
                    &format!("{} records could not be processed", counters.failure_count),
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(status: WorkStatus, errors: Vec<String>) -> WorkOutput<()> {
        WorkOutput {
            id: Value::String("doc-1".to_string()),
            status,
            errors,
            data: (),
        }
    }

    #[test]
    fn counters_track_failures_and_warnings() {
        let counters = Mutex::new(WorkOutputCounters::default());
        counters.update(&output(WorkStatus::Ok, vec![]));
        counters.update(&output(WorkStatus::Ok, vec!["low confidence".to_string()]));
        counters.update(&output(WorkStatus::Failed, vec!["boom".to_string()]));

        let counters = counters.lock().unwrap();
        assert_eq!(counters.total_record_count, 3);
        assert_eq!(counters.failure_count, 1);
        assert_eq!(counters.warning_count, 1);
    }

    #[test]
    fn work_input_parses_flattened_records() {
        let value: Value = serde_json::json!({"id": "doc-1", "path": "scan.png"});
        let input = WorkInput::<ExtractInput>::from_json(value).unwrap();
        assert_eq!(input.id, Value::String("doc-1".to_string()));
        assert_eq!(input.data.path, PathBuf::from("scan.png"));
    }

    #[test]
    fn work_input_rejects_unknown_fields() {
        let value: Value =
            serde_json::json!({"id": "doc-1", "path": "scan.png", "bogus": 1});
        assert!(WorkInput::<ExtractInput>::from_json(value).is_err());
    }

    #[test]
    fn work_output_flattens_data_fields() {
        let record = WorkOutput {
            id: Value::String("doc-1".to_string()),
            status: WorkStatus::Ok,
            errors: vec![],
            data: crate::engine::result::ExtractionResult::failed(
                crate::engine::language::LanguageMode::Mixed,
                "x".to_string(),
            ),
        };
        let json = record.to_json().unwrap();
        assert_eq!(json["id"], "doc-1");
        assert_eq!(json["status"], "ok");
        // Fields of the result are flattened into the record.
        assert_eq!(json["language_mode"], "fas+eng");
    }
}
