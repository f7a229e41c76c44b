//! Wrapper around the `tesseract` CLI tool.
//!
//! We shell out rather than binding libtesseract: the CLI is what's
//! universally packaged alongside the `fas`/`eng` language data, and a child
//! process can be killed cleanly when an attempt times out on pathological
//! input. One invocation produces both the plain-text channel (`txt`) and
//! the per-token data channel (`tsv`), so each grid cell costs a single
//! recognition pass.

use std::time::Duration;

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
};

/// Language pack for Persian.
pub const LANG_PERSIAN: &str = "fas";

/// Language pack for English.
pub const LANG_ENGLISH: &str = "eng";

/// Errors from the process-wide installation check.
///
/// This is the one-time initialization step: once it passes, the engine
/// itself is stateless and can be shared freely across concurrent runs.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The `tesseract` binary could not be run at all.
    #[error("cannot run `tesseract`; is it installed and on PATH?")]
    NotInstalled(#[source] std::io::Error),

    /// A required language pack is not installed.
    #[error("missing tesseract language pack {0:?} (install tesseract-ocr-{0})")]
    MissingLanguagePack(String),
}

/// List the language packs the installed tesseract knows about.
pub async fn list_languages() -> Result<Vec<String>, SetupError> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .await
        .map_err(SetupError::NotInstalled)?;

    // Depending on the tesseract version, the list lands on stdout or
    // stderr. The header line ("List of available languages ...") is
    // skipped either way.
    let mut langs = vec![];
    for chunk in [&output.stdout, &output.stderr] {
        for line in String::from_utf8_lossy(chunk).lines() {
            let line = line.trim();
            if line.is_empty() || line.contains("List of available languages") {
                continue;
            }
            langs.push(line.to_string());
        }
    }
    Ok(langs)
}

/// Verify that every required language pack is installed.
pub async fn verify_language_packs(required: &[&str]) -> Result<(), SetupError> {
    let installed = list_languages().await?;
    for lang in required {
        if !installed.iter().any(|l| l == lang) {
            return Err(SetupError::MissingLanguagePack((*lang).to_string()));
        }
    }
    Ok(())
}

/// One recognized token from the TSV channel, with its position and layout
/// hierarchy (page/block/paragraph/line/word).
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub level: u32,
    pub page_num: u32,
    pub block_num: u32,
    pub par_num: u32,
    pub line_num: u32,
    pub word_num: u32,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    /// Engine confidence on a 0–100 scale. Structural rows carry the `-1`
    /// sentinel, which callers interpret (skip it, or substitute a default).
    pub conf: f32,
    pub text: String,
}

/// The result of one recognition pass.
#[derive(Debug)]
pub struct Recognition {
    /// The plain-text channel, with tesseract's own line layout.
    pub text: String,
    /// The per-token data channel.
    pub tokens: Vec<Token>,
}

/// Run one recognition pass over a PNG-encoded image.
///
/// `config` is an opaque engine configuration string (`--oem`/`--psm`/`-c`
/// options), split on whitespace into argv. The child process is killed if
/// it outlives `timeout`.
#[instrument(level = "debug", skip_all, fields(lang = lang, config = config))]
pub async fn recognize(
    png: &[u8],
    lang: &str,
    config: &str,
    timeout: Duration,
) -> Result<Recognition> {
    // Write our input to a temporary file.
    let tmpdir = tempfile::TempDir::with_prefix("sanad-ocr")?;
    let input_path = tmpdir.path().join("input.png");
    let out_base = tmpdir.path().join("output");
    tokio::fs::write(&input_path, png)
        .await
        .context("cannot write tesseract input file")?;

    // Run tesseract on the input file, producing both output channels.
    let mut cmd = Command::new("tesseract");
    cmd.arg(&input_path)
        .arg(&out_base)
        .args(["-l", lang])
        .args(config.split_whitespace())
        .args(["txt", "tsv"])
        .kill_on_drop(true);
    let output = with_cpu_semaphore(|| async {
        tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("tesseract timed out after {:?}", timeout))?
            .context("cannot run tesseract")
    })
    .await?;
    check_for_command_failure("tesseract", &output, None)?;

    // Read both output channels.
    let text = tokio::fs::read_to_string(out_base.with_extension("txt"))
        .await
        .context("cannot read tesseract text output")?;
    let tsv = tokio::fs::read_to_string(out_base.with_extension("tsv"))
        .await
        .context("cannot read tesseract tsv output")?;

    Ok(Recognition {
        text,
        tokens: parse_tsv(&tsv),
    })
}

/// Parse tesseract's TSV channel into tokens.
///
/// Rows with no text (page/block/paragraph/line structure rows, and word
/// rows that recognized nothing) are dropped here; confidence sentinels are
/// preserved for the caller to interpret.
fn parse_tsv(tsv: &str) -> Vec<Token> {
    let mut tokens = vec![];
    for line in tsv.lines().skip(1) {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 12 {
            continue;
        }
        let text = parts[11].trim();
        if text.is_empty() {
            continue;
        }
        let field = |i: usize| parts[i].parse::<u32>().unwrap_or(0);
        let coord = |i: usize| parts[i].parse::<i32>().unwrap_or(0);
        tokens.push(Token {
            level: field(0),
            page_num: field(1),
            block_num: field(2),
            par_num: field(3),
            line_num: field(4),
            word_num: field(5),
            left: coord(6),
            top: coord(7),
            width: coord(8),
            height: coord(9),
            conf: parts[10].parse::<f32>().unwrap_or(-1.0),
            text: text.to_string(),
        });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "\
level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t1000\t800\t-1\t
2\t1\t1\t0\t0\t0\t40\t50\t400\t60\t-1\t
5\t1\t1\t1\t1\t1\t40\t50\t180\t40\t96.5\tINVOICE
5\t1\t1\t1\t1\t2\t240\t50\t120\t40\t88\tNO.
5\t1\t1\t1\t2\t1\t40\t120\t90\t40\t-1\t???
5\t1\t1\t1\t2\t2\t150\t120\t60\t40\t72.25\t42
";

    #[test]
    fn parse_tsv_keeps_only_rows_with_text() {
        let tokens = parse_tsv(SAMPLE_TSV);
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].text, "INVOICE");
        assert_eq!(tokens[0].conf, 96.5);
        assert_eq!(tokens[0].left, 40);
        assert_eq!(tokens[0].width, 180);
        assert_eq!(tokens[0].line_num, 1);
        assert_eq!(tokens[3].text, "42");
        assert_eq!(tokens[3].conf, 72.25);
    }

    #[test]
    fn parse_tsv_preserves_confidence_sentinels() {
        let tokens = parse_tsv(SAMPLE_TSV);
        // The "???" row recognized text but has no confidence; it must
        // survive parsing so the caller can decide what to do with it.
        assert_eq!(tokens[2].text, "???");
        assert_eq!(tokens[2].conf, -1.0);
    }

    #[test]
    fn parse_tsv_handles_short_and_empty_lines() {
        assert!(parse_tsv("header only\n").is_empty());
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("a\tb\tc\n1\t2\t3\n").is_empty());
    }

    #[tokio::test]
    #[ignore = "Requires tesseract to be installed"]
    async fn list_languages_returns_something() -> Result<()> {
        let langs = list_languages().await?;
        assert!(!langs.is_empty());
        Ok(())
    }
}
