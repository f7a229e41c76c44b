//! Language detection from a confidence-weighted sample of the page.
//!
//! We OCR a small crop from the page center with a combined Persian+English
//! model and weigh each recognized character by its token's confidence.
//! Misdetection is cheap to tolerate in one direction only: the mixed-mode
//! ladder handles Persian and English pages acceptably, so every failure
//! here degrades to [`LanguageMode::Mixed`] and never aborts the run.

use std::time::Duration;

use schemars::JsonSchema;

use crate::{prelude::*, source_page::SourcePage, tesseract};

/// Fast single-block recognition config used for the detection sample.
const DETECT_CONFIG: &str = "--oem 1 --psm 6";

/// Combined language model for the detection pass.
const DETECT_LANG: &str = "fas+eng";

/// Minimum edge of the detection crop, in pixels.
const MIN_CROP_EDGE: u32 = 150;

/// Confidence substituted for tokens whose confidence is negative or
/// unavailable.
const FALLBACK_CONFIDENCE: f32 = 30.0;

/// Persian weight share at or above which the page counts as Persian.
const PERSIAN_RATIO_THRESHOLD: f32 = 0.60;

/// English weight share at or above which the page counts as English.
const ENGLISH_RATIO_THRESHOLD: f32 = 0.55;

/// The dominant script of a page, fixed once per run.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum LanguageMode {
    #[serde(rename = "fas")]
    Persian,
    #[serde(rename = "eng")]
    English,
    #[serde(rename = "fas+eng")]
    Mixed,
}

impl LanguageMode {
    /// The tesseract language model for this mode.
    pub fn tesseract_lang(self) -> &'static str {
        match self {
            LanguageMode::Persian => tesseract::LANG_PERSIAN,
            LanguageMode::English => tesseract::LANG_ENGLISH,
            LanguageMode::Mixed => DETECT_LANG,
        }
    }

    pub fn is_english(self) -> bool {
        self == LanguageMode::English
    }
}

impl std::fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tesseract_lang())
    }
}

/// Detect the language mode of a page.
///
/// Never fails: detection errors map to [`LanguageMode::Mixed`], which
/// selects the more conservative preprocessing ladder.
#[instrument(level = "debug", skip_all)]
pub async fn detect(page: &SourcePage, attempt_timeout: Duration) -> LanguageMode {
    match detect_inner(page, attempt_timeout).await {
        Ok(mode) => {
            debug!(mode = %mode, "Detected language");
            mode
        }
        Err(err) => {
            warn!("language detection failed, assuming mixed: {:#}", err);
            LanguageMode::Mixed
        }
    }
}

async fn detect_inner(
    page: &SourcePage,
    attempt_timeout: Duration,
) -> Result<LanguageMode> {
    let crop = center_crop_png(page)?;
    let recognition =
        tesseract::recognize(&crop, DETECT_LANG, DETECT_CONFIG, attempt_timeout).await?;
    let (persian, english) = script_weights(&recognition.tokens);
    Ok(decide(persian, english))
}

/// Cut a square from the page center, roughly a third of the shorter edge
/// (at least [`MIN_CROP_EDGE`] px), and encode it as PNG.
fn center_crop_png(page: &SourcePage) -> Result<Vec<u8>> {
    let gray = page.image.to_luma8();
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(anyhow!("page has zero area"));
    }

    let edge = (w.min(h) / 3).max(MIN_CROP_EDGE);
    let x = (w.saturating_sub(edge)) / 2;
    let y = (h.saturating_sub(edge)) / 2;
    let edge_x = edge.min(w - x);
    let edge_y = edge.min(h - y);

    let crop = image::imageops::crop_imm(&gray, x, y, edge_x, edge_y).to_image();
    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(crop)
        .write_to(
            &mut std::io::Cursor::new(&mut png),
            image::ImageFormat::Png,
        )
        .context("failed to encode detection crop")?;
    Ok(png)
}

/// Accumulate confidence-weighted character counts per script.
///
/// Each token contributes `clamp(conf / 100, 0, 1) × character_count` to the
/// script its characters belong to; characters outside both scripts are
/// ignored.
fn script_weights(tokens: &[tesseract::Token]) -> (f32, f32) {
    let mut persian = 0.0f32;
    let mut english = 0.0f32;
    for token in tokens {
        let conf = if token.conf < 0.0 {
            FALLBACK_CONFIDENCE
        } else {
            token.conf
        };
        let weight = (conf / 100.0).clamp(0.0, 1.0);

        let persian_chars = token
            .text
            .chars()
            .filter(|c| ('\u{0600}'..='\u{06FF}').contains(c))
            .count();
        let english_chars = token
            .text
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .count();

        persian += persian_chars as f32 * weight;
        english += english_chars as f32 * weight;
    }
    (persian, english)
}

/// Apply the decision rule to the accumulated script weights.
fn decide(persian: f32, english: f32) -> LanguageMode {
    if persian + english == 0.0 {
        return LanguageMode::Mixed;
    }
    if english > 0.0 && persian == 0.0 {
        return LanguageMode::English;
    }
    if persian > 0.0 && english == 0.0 {
        return LanguageMode::Persian;
    }

    let persian_ratio = persian / (persian + english);
    let english_ratio = english / (persian + english);
    if persian_ratio >= PERSIAN_RATIO_THRESHOLD {
        LanguageMode::Persian
    } else if english_ratio >= ENGLISH_RATIO_THRESHOLD {
        LanguageMode::English
    } else {
        LanguageMode::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, conf: f32) -> tesseract::Token {
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
    fn pure_latin_tokens_detect_as_english() {
        let tokens = vec![word("COMMERCIAL", 95.0), word("INVOICE", 91.0)];
        let (persian, english) = script_weights(&tokens);
        assert_eq!(persian, 0.0);
        assert!(english > 0.0);
        assert_eq!(decide(persian, english), LanguageMode::English);
    }

    #[test]
    fn pure_persian_tokens_detect_as_persian() {
        let tokens = vec![word("فاکتور", 88.0), word("گمرک", 90.0)];
        let (persian, english) = script_weights(&tokens);
        assert_eq!(english, 0.0);
        assert_eq!(decide(persian, english), LanguageMode::Persian);
    }

    #[test]
    fn majority_persian_weight_detects_as_persian() {
        // 60% of the weighted characters are Persian-script.
        assert_eq!(decide(60.0, 40.0), LanguageMode::Persian);
        assert_eq!(decide(59.0, 41.0), LanguageMode::Mixed);
    }

    #[test]
    fn majority_english_weight_detects_as_english() {
        assert_eq!(decide(40.0, 60.0), LanguageMode::English);
        assert_eq!(decide(45.0, 55.0), LanguageMode::English);
        assert_eq!(decide(46.0, 54.0), LanguageMode::Mixed);
    }

    #[test]
    fn no_recognized_text_falls_back_to_mixed() {
        assert_eq!(decide(0.0, 0.0), LanguageMode::Mixed);
    }

    #[test]
    fn negative_confidence_still_counts_with_fallback_weight() {
        let tokens = vec![word("invoice", -1.0)];
        let (persian, english) = script_weights(&tokens);
        assert_eq!(persian, 0.0);
        // 7 characters at the 30% fallback weight.
        assert!((english - 7.0 * 0.3).abs() < 1e-5);
    }

    #[test]
    fn digits_and_punctuation_carry_no_script_weight() {
        let tokens = vec![word("1234-56", 99.0)];
        assert_eq!(script_weights(&tokens), (0.0, 0.0));
    }

    #[test]
    fn language_mode_serializes_as_tesseract_code() {
        assert_eq!(
            serde_json::to_string(&LanguageMode::Persian).unwrap(),
            "\"fas\""
        );
        assert_eq!(
            serde_json::to_string(&LanguageMode::Mixed).unwrap(),
            "\"fas+eng\""
        );
    }
}
