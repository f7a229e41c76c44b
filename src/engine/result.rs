//! The engine's output contract.

use schemars::JsonSchema;

use crate::{engine::language::LanguageMode, engine::structured::StructuredData, prelude::*};

/// Version tag recorded in every result, for downstream audit trails.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tuning profile tag recorded in every result.
pub const OPTIMIZATION_PROFILE: &str = "speed+accuracy";

/// One recognized token located on the page, with its layout hierarchy.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BoundingBox {
    /// The recognized token text.
    pub text: String,
    /// Engine confidence for this token, 0–100.
    pub confidence: f32,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub level: u32,
    pub page_num: u32,
    pub block_num: u32,
    pub par_num: u32,
    pub line_num: u32,
    pub word_num: u32,
}

/// The result of one extraction run. Constructed once, at the end of the
/// run, and immutable afterwards.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractionResult {
    /// Did the run produce a usable result? `false` only for input errors
    /// (unreadable file, failed PDF rasterization).
    pub success: bool,

    /// Human-readable error message when `success` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The winning attempt's text, as recognized.
    pub raw_text: String,

    /// The winning attempt's text after language-specific normalization.
    pub normalized_text: String,

    /// Mean token confidence of the winning attempt, scaled to [0.0, 1.0].
    ///
    /// Confidences are 0–100 everywhere inside the engine; this is the one
    /// place the division by 100 happens.
    pub confidence: f32,

    /// Wall-clock seconds spent preprocessing and searching the grid.
    pub processing_time: f64,

    /// The detected language mode for the page.
    pub language_mode: LanguageMode,

    /// Structured tokens harvested from the normalized text.
    pub structured_data: StructuredData,

    /// Identifier of the winning (strategy, configuration) pair,
    /// `"S:<n>|C:<m>"` with 1-based indices, or `""` when no attempt won.
    pub strategy: String,

    /// Per-token boxes from the winning attempt.
    pub bounding_boxes: Vec<BoundingBox>,

    /// Engine version tag.
    pub version: String,

    /// Engine tuning profile tag.
    pub optimization: String,
}

impl ExtractionResult {
    /// Build the failure result for an input error. Everything except the
    /// language mode (which may have been detected before the failure) is
    /// zeroed out.
    pub fn failed(language_mode: LanguageMode, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            raw_text: String::new(),
            normalized_text: String::new(),
            confidence: 0.0,
            processing_time: 0.0,
            language_mode,
            structured_data: StructuredData::default(),
            strategy: String::new(),
            bounding_boxes: vec![],
            version: ENGINE_VERSION.to_string(),
            optimization: OPTIMIZATION_PROFILE.to_string(),
        }
    }

    /// The method string recorded by downstream correction and report
    /// layers, e.g. `"OCR:3.2.0:S:1|C:3"`.
    pub fn method(&self) -> String {
        format!("OCR:{}:{}", self.version, self.strategy)
    }
}

/// Format a 1-based (strategy, configuration) pair as a strategy identifier.
pub fn strategy_label(strategy_idx: usize, config_idx: usize) -> String {
    format!("S:{}|C:{}", strategy_idx, config_idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_label_is_one_based() {
        assert_eq!(strategy_label(1, 3), "S:1|C:3");
        assert_eq!(strategy_label(2, 1), "S:2|C:1");
    }

    #[test]
    fn failed_result_is_empty() {
        let result =
            ExtractionResult::failed(LanguageMode::Mixed, "boom".to_string());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.confidence, 0.0);
        assert!(result.bounding_boxes.is_empty());
        assert!(result.structured_data.persian_words.is_empty());
    }

    #[test]
    fn method_string_includes_version_and_strategy() {
        let mut result =
            ExtractionResult::failed(LanguageMode::Mixed, "x".to_string());
        result.strategy = strategy_label(1, 2);
        assert_eq!(result.method(), format!("OCR:{}:S:1|C:2", ENGINE_VERSION));
    }

    #[test]
    fn serializes_language_mode_as_tesseract_code() {
        let result = ExtractionResult::failed(LanguageMode::Mixed, "x".to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["language_mode"], "fas+eng");
        assert_eq!(json["success"], false);
    }
}
