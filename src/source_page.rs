//! Loading a document into a single raster page.
//!
//! A run operates on exactly one page: a raster image used as-is, or the
//! first page of a PDF rasterized with Poppler's `pdftocairo` CLI tool.
//! Failure to produce that page is a hard failure for the whole run; we do
//! not fall back to partial input.

use std::sync::LazyLock;

use image::DynamicImage;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_semaphore,
    prelude::*,
};

/// Image types supported as-is.
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/tiff",
];

/// PDF MIME type, rasterized via `pdftocairo`.
const PDF_MIME_TYPE: &str = "application/pdf";

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// One raster page, owned exclusively by a single pipeline run.
#[derive(Debug)]
pub struct SourcePage {
    /// The decoded page image.
    pub image: DynamicImage,
    /// Any warnings emitted while producing the page (rasterizer chatter).
    pub warnings: Vec<String>,
}

impl SourcePage {
    /// Load a [`SourcePage`] from a path, based on the detected MIME type.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path, rasterize_dpi: u32) -> Result<Self> {
        let mime_type = get_mime_type(path)?;

        if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
            Self::from_image_file(path).await
        } else if mime_type == PDF_MIME_TYPE {
            Self::from_pdf_first_page(path, rasterize_dpi).await
        } else {
            Err(anyhow!(
                "unsupported MIME type {} for {:?} (supported: PNG, JPEG, WebP, GIF, TIFF, PDF)",
                mime_type,
                path.display()
            ))
        }
    }

    /// Decode an image file into a page.
    async fn from_image_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image {:?}", path.display()))?;
        let image = spawn_blocking_propagating_panics(move || {
            image::load_from_memory(&bytes)
        })
        .await
        .with_context(|| format!("failed to decode image {:?}", path.display()))?;
        Ok(Self {
            image,
            warnings: vec![],
        })
    }

    /// Rasterize the first page of a PDF file with `pdftocairo`.
    ///
    /// Trade documents are single-page scans in practice; a multi-page PDF
    /// contributes only its first page, matching the input contract.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi = rasterize_dpi))]
    async fn from_pdf_first_page(path: &Path, rasterize_dpi: u32) -> Result<Self> {
        // Create a temporary directory to hold the PNG file. Released when
        // this function returns, whether or not decoding succeeds.
        let tmpdir = tempfile::TempDir::with_prefix("sanad-page")?;
        let out_base = tmpdir.path().join("page");

        // Run pdftocairo to convert the first PDF page to a PNG file.
        //
        // We use `with_cpu_semaphore` because `pdftocairo` will use _at least_
        // 100% of a CPU, and we don't want to run 200 copies of it at once by
        // mistake. `-singlefile` keeps the output name digit-free.
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png")
            .arg("-singlefile")
            .args(["-f", "1", "-l", "1"])
            .arg("-r")
            .arg(rasterize_dpi.to_string());
        let output = with_cpu_semaphore(|| async {
            cmd.arg(path).arg(&out_base).output().await.with_context(|| {
                format!("failed to run pdftocairo on {:?}", path.display())
            })
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        // Collect rasterizer chatter as warnings for the caller.
        let mut warnings = vec![];
        for chunk in [&output.stdout, &output.stderr] {
            for line in String::from_utf8_lossy(chunk).lines() {
                let line = line.trim();
                if !line.is_empty() {
                    warnings.push(line.to_string());
                }
            }
        }

        let png_path = out_base.with_extension("png");
        let bytes = std::fs::read(&png_path).with_context(|| {
            format!(
                "pdftocairo produced no output for {:?} (expected {:?})",
                path.display(),
                png_path.display()
            )
        })?;
        let image = spawn_blocking_propagating_panics(move || {
            image::load_from_memory(&bytes)
        })
        .await
        .with_context(|| {
            format!("failed to decode rasterized page for {:?}", path.display())
        })?;

        Ok(Self { image, warnings })
    }
}

/// Get the MIME type of a file.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("error: something went wrong"));
        assert!(is_error_line("ERROR: something went wrong"));
        assert!(!is_error_line("Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }

    #[tokio::test]
    async fn unreadable_path_is_a_hard_failure() {
        let err = SourcePage::load(Path::new("/nonexistent/scan.png"), 300)
            .await
            .expect_err("missing file should fail the run");
        assert!(err.to_string().contains("MIME type"));
    }
}
