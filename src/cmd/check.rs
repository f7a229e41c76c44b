//! The `check` subcommand.
//!
//! Verifies the process-wide prerequisites once, up front, so batch runs on
//! misconfigured hosts fail with a clear message instead of failing every
//! document: the `tesseract` binary must be runnable and the required
//! language packs installed.

use clap::Args;

use crate::{prelude::*, tesseract, ui::Ui};

/// Options for the `check` subcommand.
#[derive(Debug, Args)]
pub struct CheckOpts {
    /// Additional language packs to require beyond `fas` and `eng`.
    #[clap(long = "lang")]
    pub extra_langs: Vec<String>,
}

/// The `check` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_check(ui: Ui, opts: &CheckOpts) -> Result<()> {
    let mut required = vec![tesseract::LANG_PERSIAN, tesseract::LANG_ENGLISH];
    required.extend(opts.extra_langs.iter().map(String::as_str));

    let installed = tesseract::list_languages().await?;
    ui.display_message(
        "🔍",
        &format!("tesseract found with {} language packs", installed.len()),
    );

    tesseract::verify_language_packs(&required).await?;
    for lang in &required {
        ui.display_message("✅", &format!("language pack {lang:?} installed"));
    }

    // PDF inputs also need Poppler; image-only deployments can ignore this.
    match tokio::process::Command::new("pdftocairo")
        .arg("-v")
        .output()
        .await
    {
        Ok(_) => ui.display_message("✅", "pdftocairo installed"),
        Err(err) => {
            warn!("cannot run pdftocairo: {}", err);
            ui.display_message("⚠️", "pdftocairo not found; PDF inputs will fail");
        }
    }
    Ok(())
}
