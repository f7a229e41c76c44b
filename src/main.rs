use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod batch;
mod cmd;
mod cpu_limit;
mod engine;
mod prelude;
mod source_page;
mod tesseract;
mod ui;

/// Extract text from scanned Persian/English trade documents.
#[derive(Debug, Parser)]
#[clap(
    version,
    after_help = r#"
External tools:
  - `tesseract` with the `fas` and `eng` language packs installed.
  - Poppler's `pdftocairo`, for PDF inputs.

  Run `sanad-ocr check` to verify an installation before processing
  a large batch.

Environment Variables:
  - RUST_LOG (optional): Override the log filter, e.g. `sanad_ocr=debug`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR images and PDFs. The input file should have `id` and `path` fields.
    Extract(cmd::extract::ExtractOpts),
    /// Verify that tesseract and the required language packs are installed.
    Check(cmd::check::CheckOpts),
    /// Print schemas for input and output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Extract(opts) => opts.output_path.is_none(),
            Cmd::Check(_) => false,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Extract(opts) => {
            cmd::extract::cmd_extract(ui, opts).await?;
        }
        Cmd::Check(opts) => {
            cmd::check::cmd_check(ui, opts).await?;
        }
        Cmd::Schema(opts) => {
            cmd::schema::cmd_schema(opts).await?;
        }
    }
    Ok(())
}
