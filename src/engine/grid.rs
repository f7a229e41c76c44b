//! Grid search over preprocessing strategies × engine configurations.
//!
//! Every (candidate, configuration) pair gets one recognition pass. Cells
//! may run concurrently, but selection is an explicit ordered fold over the
//! results in (strategy, configuration) order, so the tie-break — first
//! strategy, then first configuration, wins on exactly equal confidence —
//! holds no matter how the cells are scheduled. A new attempt replaces the
//! current best only on strictly greater mean confidence.

use std::sync::Arc;

use futures::{StreamExt as _, stream};
use tokio::time::Instant;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    engine::{
        EngineOptions,
        language::LanguageMode,
        preprocess::Candidate,
        result::BoundingBox,
    },
    prelude::*,
    tesseract,
};

/// One completed grid cell.
#[derive(Clone, Debug)]
pub struct Attempt {
    /// 1-based preprocessing strategy index.
    pub strategy_idx: usize,
    /// 1-based configuration index.
    pub config_idx: usize,
    /// The recognized text for this attempt.
    pub text: String,
    /// Arithmetic mean of the surviving token confidences, 0–100.
    pub mean_confidence: f32,
    /// Boxes for the surviving tokens.
    pub boxes: Vec<BoundingBox>,
}

/// Run the full grid and reduce it to the best attempt, if any.
///
/// Per-attempt failures (including timeouts) are logged and skipped; they
/// compete with zero confidence rather than crashing the run. When the
/// document deadline expires, remaining cells are cancelled and the best
/// attempt folded so far is returned.
#[instrument(level = "debug", skip_all, fields(mode = %mode))]
pub async fn run(
    candidates: Vec<Candidate>,
    configs: &'static [&'static str],
    mode: LanguageMode,
    opts: &EngineOptions,
) -> Option<Attempt> {
    // Encode each candidate once; the PNG is shared by its grid row.
    let mut encoded = vec![];
    for candidate in candidates {
        let index = candidate.index;
        let result = spawn_blocking_propagating_panics(move || {
            let mut png = Vec::new();
            image::DynamicImage::ImageLuma8(candidate.image)
                .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                .map(|()| png)
        })
        .await;
        match result {
            Ok(png) => encoded.push((index, Arc::new(png))),
            Err(err) => {
                warn!(strategy = index, "failed to encode candidate: {}", err);
            }
        }
    }

    // The exhaustive product, in priority order.
    let lang = mode.tesseract_lang();
    let attempt_timeout = opts.attempt_timeout;
    let mut cells = vec![];
    for (strategy_idx, png) in &encoded {
        for (i, config) in configs.iter().enumerate() {
            cells.push((*strategy_idx, i + 1, png.clone(), *config));
        }
    }
    let mut results = stream::iter(cells)
        .map(move |(strategy_idx, config_idx, png, config)| {
            run_cell(strategy_idx, config_idx, png, lang, config, mode, attempt_timeout)
        })
        .buffered(opts.grid_concurrency);

    // Ordered fold, bounded by the document deadline.
    let deadline = opts.document_deadline.map(|d| Instant::now() + d);
    let min_text_len = mode.is_english().then_some(opts.min_english_text_len);
    let mut best: Option<Attempt> = None;
    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, results.next()).await
            {
                Ok(next) => next,
                Err(_) => {
                    warn!("document deadline reached, keeping best attempt so far");
                    break;
                }
            },
            None => results.next().await,
        };
        let Some(result) = next else { break };
        if let Some(attempt) = result {
            fold_best(&mut best, attempt, min_text_len);
        }
    }
    best
}

/// Run a single grid cell. Failures are absorbed here.
async fn run_cell(
    strategy_idx: usize,
    config_idx: usize,
    png: Arc<Vec<u8>>,
    lang: &'static str,
    config: &'static str,
    mode: LanguageMode,
    timeout: std::time::Duration,
) -> Option<Attempt> {
    match tesseract::recognize(&png, lang, config, timeout).await {
        Ok(recognition) => {
            let attempt = attempt_from_recognition(strategy_idx, config_idx, recognition, mode);
            debug!(
                strategy = strategy_idx,
                config = config_idx,
                confidence = attempt.mean_confidence,
                "grid cell complete"
            );
            Some(attempt)
        }
        Err(err) => {
            warn!(
                strategy = strategy_idx,
                config = config_idx,
                "grid cell failed: {:#}",
                err
            );
            None
        }
    }
}

/// Turn one recognition pass into a scored attempt.
///
/// Tokens with the unavailable-confidence sentinel are discarded. On the
/// English path the attempt's text is the surviving tokens joined with
/// spaces; elsewhere it is the engine's plain-text channel, which preserves
/// the line layout Persian normalization relies on.
fn attempt_from_recognition(
    strategy_idx: usize,
    config_idx: usize,
    recognition: tesseract::Recognition,
    mode: LanguageMode,
) -> Attempt {
    let scored: Vec<&tesseract::Token> = recognition
        .tokens
        .iter()
        .filter(|token| token.conf >= 0.0)
        .collect();

    let mean_confidence = if scored.is_empty() {
        0.0
    } else {
        scored.iter().map(|t| t.conf).sum::<f32>() / scored.len() as f32
    };

    let text = if mode.is_english() {
        scored
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        recognition.text
    };

    let boxes = scored
        .iter()
        .map(|token| BoundingBox {
            text: token.text.clone(),
            confidence: token.conf,
            left: token.left,
            top: token.top,
            width: token.width,
            height: token.height,
            level: token.level,
            page_num: token.page_num,
            block_num: token.block_num,
            par_num: token.par_num,
            line_num: token.line_num,
            word_num: token.word_num,
        })
        .collect();

    Attempt {
        strategy_idx,
        config_idx,
        text,
        mean_confidence,
        boxes,
    }
}

/// Fold one attempt into the running best.
///
/// The replacement rule is strict improvement: an attempt wins only with a
/// mean confidence strictly greater than the incumbent's (or than zero when
/// there is no incumbent, so empty attempts never win). With `min_text_len`
/// set, attempts whose text is not longer than the minimum are ineligible
/// regardless of confidence.
fn fold_best(best: &mut Option<Attempt>, attempt: Attempt, min_text_len: Option<usize>) {
    if let Some(min) = min_text_len {
        if attempt.text.chars().count() <= min {
            return;
        }
    }
    let incumbent = best.as_ref().map_or(0.0, |b| b.mean_confidence);
    if attempt.mean_confidence > incumbent {
        *best = Some(attempt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(strategy: usize, config: usize, conf: f32, text: &str) -> Attempt {
        Attempt {
            strategy_idx: strategy,
            config_idx: config,
            text: text.to_string(),
            mean_confidence: conf,
            boxes: vec![],
        }
    }

    fn token(text: &str, conf: f32) -> tesseract::Token {
        tesseract::Token {
            level: 5,
            page_num: 1,
            block_num: 1,
            par_num: 1,
            line_num: 1,
            word_num: 1,
            left: 0,
            top: 0,
            width: 10,
            height: 10,
            conf,
            text: text.to_string(),
        }
    }

    #[test]
    fn fold_keeps_best_confidence_monotonic() {
        let confidences = [30.0, 85.0, 60.0, 85.0, 90.0, 10.0];
        let mut best = None;
        let mut last_best = 0.0;
        for (i, conf) in confidences.into_iter().enumerate() {
            fold_best(&mut best, attempt(1, i + 1, conf, "long enough text"), None);
            let current = best.as_ref().unwrap().mean_confidence;
            assert!(current >= last_best);
            last_best = current;
        }
        assert_eq!(last_best, 90.0);
    }

    #[test]
    fn ties_keep_the_earlier_attempt() {
        let mut best = None;
        fold_best(&mut best, attempt(1, 2, 85.0, "first text"), None);
        fold_best(&mut best, attempt(2, 1, 85.0, "second text"), None);
        let winner = best.unwrap();
        assert_eq!((winner.strategy_idx, winner.config_idx), (1, 2));
    }

    #[test]
    fn zero_confidence_attempts_never_win() {
        let mut best = None;
        fold_best(&mut best, attempt(1, 1, 0.0, ""), None);
        assert!(best.is_none());
    }

    #[test]
    fn english_length_gate_excludes_short_text() {
        let mut best = None;
        let short = "x".repeat(50);
        let long = "y".repeat(51);
        fold_best(&mut best, attempt(1, 1, 99.0, &short), Some(50));
        assert!(best.is_none(), "50 chars is not strictly longer than 50");
        fold_best(&mut best, attempt(1, 2, 60.0, &long), Some(50));
        let winner = best.unwrap();
        assert_eq!(winner.config_idx, 2);
        // The short-but-confident attempt still cannot displace it.
        fold_best(&mut best, attempt(2, 1, 99.0, &short), Some(50));
        assert_eq!(best.unwrap().config_idx, 2);
    }

    #[test]
    fn attempt_mean_ignores_sentinel_confidences() {
        let recognition = tesseract::Recognition {
            text: "from the text channel".to_string(),
            tokens: vec![token("a", 80.0), token("b", -1.0), token("c", 90.0)],
        };
        let attempt =
            attempt_from_recognition(1, 1, recognition, LanguageMode::Mixed);
        assert_eq!(attempt.mean_confidence, 85.0);
        assert_eq!(attempt.boxes.len(), 2);
        assert_eq!(attempt.text, "from the text channel");
    }

    #[test]
    fn english_attempts_join_tokens_for_text() {
        let recognition = tesseract::Recognition {
            text: "ignored".to_string(),
            tokens: vec![token("COMMERCIAL", 90.0), token("INVOICE", 92.0)],
        };
        let attempt =
            attempt_from_recognition(1, 1, recognition, LanguageMode::English);
        assert_eq!(attempt.text, "COMMERCIAL INVOICE");
        assert_eq!(attempt.mean_confidence, 91.0);
    }

    #[test]
    fn no_tokens_means_zero_confidence() {
        let recognition = tesseract::Recognition {
            text: String::new(),
            tokens: vec![],
        };
        let attempt =
            attempt_from_recognition(1, 1, recognition, LanguageMode::Persian);
        assert_eq!(attempt.mean_confidence, 0.0);
        assert!(attempt.boxes.is_empty());
    }
}
