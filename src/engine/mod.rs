//! The multi-strategy OCR extraction engine.
//!
//! One run moves a document through a fixed sequence: load the page, detect
//! the language, generate preprocessing candidates, grid-search candidates ×
//! configurations, select the best attempt, normalize its text, and harvest
//! structured tokens. Only the page-loading step can fail the run; language
//! detection degrades to mixed mode, and individual grid cells fail
//! silently into the fold.
//!
//! The engine holds no mutable state, so one instance can serve any number
//! of concurrent runs. The process-wide installation check
//! ([`crate::tesseract::verify_language_packs`]) is a separate, explicit
//! step rather than a constructor side effect.

use std::time::{Duration, Instant};

use crate::{
    async_utils::spawn_blocking_propagating_panics, prelude::*, source_page::SourcePage,
};

pub mod configs;
pub mod grid;
pub mod language;
pub mod normalize;
pub mod preprocess;
pub mod result;
pub mod structured;

use self::{
    language::LanguageMode,
    result::{ENGINE_VERSION, ExtractionResult, OPTIMIZATION_PROFILE, strategy_label},
};

/// Tuning knobs for one engine instance.
///
/// The English length gate and the low-confidence threshold are empirical
/// constants carried over from accuracy measurements; they are exposed here
/// instead of being buried in the pipeline so deployments can adjust them.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// DPI used when rasterizing the first page of a PDF.
    pub rasterize_dpi: u32,

    /// Kill a single recognition pass after this long.
    pub attempt_timeout: Duration,

    /// Optional whole-document budget for the grid search. When it runs
    /// out, remaining cells are cancelled and the best attempt found so far
    /// wins.
    pub document_deadline: Option<Duration>,

    /// How many grid cells may run concurrently for one document.
    pub grid_concurrency: usize,

    /// English attempts must produce strictly more than this many
    /// characters to be eligible, guarding against high-confidence but
    /// near-empty extractions.
    pub min_english_text_len: usize,

    /// Mean confidences (0–100) below this raise a quality warning without
    /// failing the run.
    pub low_confidence_threshold: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rasterize_dpi: 300,
            attempt_timeout: Duration::from_secs(120),
            document_deadline: None,
            grid_concurrency: 3,
            min_english_text_len: 50,
            low_confidence_threshold: 50.0,
        }
    }
}

/// The extraction engine. Stateless; share freely.
pub struct OcrEngine {
    opts: EngineOptions,
}

impl OcrEngine {
    pub fn new(opts: EngineOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Extract text from one document.
    ///
    /// Never panics or errors across this boundary: input problems come
    /// back as a result with `success == false` and an error message.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn extract(&self, path: &Path) -> ExtractionResult {
        match self.extract_inner(path).await {
            Ok(result) => result,
            Err(err) => {
                warn!("extraction failed for {:?}: {:#}", path.display(), err);
                ExtractionResult::failed(LanguageMode::Mixed, format!("{:#}", err))
            }
        }
    }

    async fn extract_inner(&self, path: &Path) -> Result<ExtractionResult> {
        // Input errors (unreadable file, failed rasterization) are the only
        // hard failures; everything after this point degrades instead.
        let page = SourcePage::load(path, self.opts.rasterize_dpi).await?;
        for warning in &page.warnings {
            debug!("rasterizer: {}", warning);
        }

        let mode = language::detect(&page, self.opts.attempt_timeout).await;
        info!(mode = %mode, "processing page");

        let started = Instant::now();

        // Preprocessing is CPU-bound; keep it off the async executor.
        let ladder = preprocess::ladder_for(mode);
        let image = page.image;
        let candidates =
            spawn_blocking_propagating_panics(move || ladder.candidates(&image))
                .await
                .context("preprocessing failed")?;
        debug_assert!(candidates.len() <= preprocess::MAX_CANDIDATES);

        let configs = configs::for_mode(mode);
        let best = grid::run(candidates, configs, mode, &self.opts).await;

        let (raw_text, confidence, strategy, bounding_boxes) = match best {
            Some(attempt) => (
                attempt.text,
                attempt.mean_confidence,
                strategy_label(attempt.strategy_idx, attempt.config_idx),
                attempt.boxes,
            ),
            None => {
                warn!("no grid attempt produced any tokens");
                (String::new(), 0.0, String::new(), vec![])
            }
        };
        if confidence < self.opts.low_confidence_threshold {
            warn!(
                confidence = confidence,
                threshold = self.opts.low_confidence_threshold,
                "best attempt is below the confidence threshold"
            );
        }

        let normalized_text = normalize::normalize(&raw_text, mode);
        let structured_data = structured::extract(&normalized_text);
        let processing_time = started.elapsed().as_secs_f64();

        debug!(
            confidence = confidence,
            strategy = %strategy,
            seconds = processing_time,
            "extraction complete"
        );

        Ok(ExtractionResult {
            success: true,
            error: None,
            raw_text,
            normalized_text,
            // The one place internal 0–100 confidence becomes 0.0–1.0.
            confidence: confidence / 100.0,
            processing_time,
            language_mode: mode,
            structured_data,
            strategy,
            bounding_boxes,
            version: ENGINE_VERSION.to_string(),
            optimization: OPTIMIZATION_PROFILE.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_carry_the_tuned_constants() {
        let opts = EngineOptions::default();
        assert_eq!(opts.min_english_text_len, 50);
        assert_eq!(opts.low_confidence_threshold, 50.0);
        assert_eq!(opts.rasterize_dpi, 300);
    }

    #[tokio::test]
    async fn unreadable_input_yields_a_failed_result() {
        let engine = OcrEngine::new(EngineOptions::default());
        let result = engine.extract(Path::new("/nonexistent/input.pdf")).await;
        assert!(!result.success);
        assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.processing_time, 0.0);
        assert!(result.bounding_boxes.is_empty());
        assert_eq!(result.strategy, "");
    }
}
