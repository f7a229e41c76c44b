//! Engine configuration sets.
//!
//! Three configuration strings per language mode, ordered best-first from
//! accuracy measurements over a corpus of real scans. The order matters for
//! tie-breaking only: when two attempts land on exactly the same confidence,
//! the earlier configuration wins.

use crate::engine::language::LanguageMode;

/// Configurations for pure-English pages: sparse text, full automatic
/// segmentation, single column.
static ENGLISH_CONFIGS: [&str; 3] = [
    "--oem 1 --psm 11 -c preserve_interword_spaces=1 -c textord_heavy_nr=1",
    "--oem 1 --psm 3 -c preserve_interword_spaces=1 -c textord_heavy_nr=1",
    "--oem 1 --psm 4 -c preserve_interword_spaces=1 -c textord_heavy_nr=1",
];

/// Configurations for Persian and mixed pages: sparse text, single block,
/// full automatic segmentation.
static PERSIAN_CONFIGS: [&str; 3] = [
    "--oem 1 --psm 11 -c preserve_interword_spaces=1 -c textord_heavy_nr=1",
    "--oem 1 --psm 6 -c preserve_interword_spaces=1 -c textord_heavy_nr=1",
    "--oem 1 --psm 3 -c preserve_interword_spaces=1 -c textord_heavy_nr=1",
];

/// The ordered configuration set for a language mode.
pub fn for_mode(mode: LanguageMode) -> &'static [&'static str] {
    match mode {
        LanguageMode::English => &ENGLISH_CONFIGS,
        LanguageMode::Persian | LanguageMode::Mixed => &PERSIAN_CONFIGS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_has_exactly_three_configs() {
        for mode in [
            LanguageMode::Persian,
            LanguageMode::English,
            LanguageMode::Mixed,
        ] {
            assert_eq!(for_mode(mode).len(), 3);
        }
    }

    #[test]
    fn all_configs_carry_the_common_options() {
        // LSTM engine, keep interword spaces, heavy noise removal.
        let common = "--oem 1 -c preserve_interword_spaces=1 -c textord_heavy_nr=1";
        for config in ENGLISH_CONFIGS.iter().chain(PERSIAN_CONFIGS.iter()) {
            for option in common.split_whitespace() {
                assert!(
                    config.contains(option),
                    "{config:?} is missing {option:?}"
                );
            }
        }
    }

    #[test]
    fn mixed_pages_use_the_persian_set() {
        assert_eq!(
            for_mode(LanguageMode::Mixed),
            for_mode(LanguageMode::Persian)
        );
    }
}
