//! The `extract` subcommand.

use std::{sync::Arc, time::Duration};

use clap::Args;
use futures::StreamExt as _;

use crate::{
    batch::{ExtractInput, ExtractOutput, WorkInput, extract_one},
    cmd::StreamOpts,
    engine::{EngineOptions, OcrEngine},
    prelude::*,
    tesseract,
    ui::{ProgressConfig, Ui},
};

/// Options for the `extract` subcommand.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// JSONL or CSV file with `id` and `path` fields. Reads stdin if
    /// omitted.
    pub input_path: Option<PathBuf>,

    /// The output file. Writes JSONL to stdout if omitted.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,

    /// The DPI to use when rasterizing the first page of a PDF.
    #[clap(long, default_value = "300")]
    pub rasterize_dpi: u32,

    /// Kill a single OCR attempt after this many seconds.
    #[clap(long, default_value = "120")]
    pub attempt_timeout: u64,

    /// Give up on remaining grid cells for a document after this many
    /// seconds, keeping the best attempt found so far.
    #[clap(long)]
    pub document_deadline: Option<u64>,

    /// Max number of OCR attempts to run at a time for one document.
    #[clap(long, default_value = "3")]
    pub grid_jobs: usize,

    /// Minimum recognized character count for English attempts to be
    /// eligible as the best result.
    #[clap(long, default_value = "50")]
    pub min_english_text_len: usize,

    /// Mean confidence (0-100) below which a result is flagged for manual
    /// review.
    #[clap(long, default_value = "50")]
    pub low_confidence_threshold: f32,
}

impl ExtractOpts {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            rasterize_dpi: self.rasterize_dpi,
            attempt_timeout: Duration::from_secs(self.attempt_timeout),
            document_deadline: self.document_deadline.map(Duration::from_secs),
            grid_concurrency: self.grid_jobs.max(1),
            min_english_text_len: self.min_english_text_len,
            low_confidence_threshold: self.low_confidence_threshold,
        }
    }
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    // Fail fast on a broken installation, before reading any input.
    tesseract::verify_language_packs(&[
        tesseract::LANG_PERSIAN,
        tesseract::LANG_ENGLISH,
    ])
    .await?;

    let engine = Arc::new(OcrEngine::new(opts.engine_options()));

    // Open up our input stream and parse into records.
    let input =
        WorkInput::<ExtractInput>::read_stream(ui.clone(), opts.input_path.as_deref())
            .await?;
    let input = opts.stream_opts.apply_stream_input_opts(input);

    // Configure our progress bar.
    let pb = ui.new_from_size_hint(
        &ProgressConfig {
            emoji: "📄",
            msg: "Extracting documents",
            done_msg: "Extracted documents",
        },
        input.size_hint(),
    );

    // Process documents with bounded concurrency, preserving input order.
    let output = input
        .map(move |record| {
            let engine = engine.clone();
            async move {
                let record = record?;
                Ok(extract_one(engine, record).await)
            }
        })
        .buffered(opts.stream_opts.job_count);
    let output = pb.wrap_stream(output).boxed();

    ExtractOutput::write_stream(&ui, opts.output_path.as_deref(), output, &opts.stream_opts)
        .await
}
