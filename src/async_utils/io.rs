//! I/O utilities.
//!
//! This module reads JSONL and CSV work-record files and writes JSONL
//! results. Inputs may come from a file or from standard input, and the
//! format is detected from the filename or the first byte of the stream.
//! When the input is a real file we pre-count its records so the progress
//! bar can show a meaningful total; the count travels with the stream as a
//! `size_hint`.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Stream, TryStreamExt, pin_mut, stream::StreamExt as _};
use peekable::tokio::AsyncPeekable;
use serde_json::Map;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt as _,
        BufReader, BufWriter, ReadBuf,
    },
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::BoxedStream;

/// A smart async reader that uses [`AsyncPeekable`] to detect whether the
/// input is JSONL or CSV.
pub struct SmartReader {
    /// Do we expect our input to be JSONL?
    is_json_like: bool,

    /// A human-readable description of the input source, for error messages.
    description: String,

    /// Our reader. There's some [`Pin`] stuff going on here because we're
    /// defining an async reader, and we don't want the value to get moved while
    /// an async function holds pointers into it.
    reader: Pin<Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>>,
}

impl SmartReader {
    /// Create a new `SmartReader` from an existing reader.
    pub async fn new_from_reader(
        description: String,
        reader: impl AsyncRead + Unpin + Send + Sync + 'static,
    ) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut peekable = AsyncPeekable::new(Box::new(reader));
        let mut buffer = vec![0; 1];
        peekable.peek_exact(&mut buffer).await?;
        let is_json_like = buffer[0] == b'{';
        Ok(Self {
            is_json_like,
            description,
            reader: Box::pin(BufReader::new(peekable)),
        })
    }

    /// Create a new `SmartReader` from a [`Path`].
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().unwrap_or_default();
        let is_json_like = ext == "json" || ext == "jsonl";
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?;
        Ok(Self {
            is_json_like,
            description: path.to_string_lossy().into_owned(),
            reader: Box::pin(BufReader::new(file)),
        })
    }

    /// Create a new `SmartReader` from either a [`Path`] or standard input.
    pub async fn new_from_path_or_stdin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new_from_path(path).await,
            None => {
                let stdin = tokio::io::stdin();
                Self::new_from_reader("stdin".to_owned(), stdin).await
            }
        }
    }

    /// Is our input JSON-like?
    pub fn is_json_like(&self) -> bool {
        self.is_json_like
    }
}

impl AsyncRead for SmartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::get_mut(self).reader.as_mut().poll_read(cx, buf)
    }
}

impl AsyncBufRead for SmartReader {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<&[u8]>> {
        Pin::get_mut(self).reader.as_mut().poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::get_mut(self).reader.as_mut().consume(amt)
    }
}

/// Count JSONL or CSV records in a file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn count_jsonl_or_csv_records(
    ui: &Ui,
    path: &Path,
) -> Result<(usize, Option<usize>)> {
    // If this isn't a file, we can't count records. This may happen if our
    // input is a named pipe.
    if !path.is_file() {
        return Ok((0, None));
    }

    // Create a progress indicator.
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🧮",
        msg: "Counting input records",
        done_msg: "Counted input records",
    });

    // Count records.
    let reader = SmartReader::new_from_path_or_stdin(Some(path)).await?;
    let count = if reader.is_json_like() {
        let lines = LinesStream::new(reader.lines());
        lines
            .try_fold(0, |acc, _line| async move { Ok(acc + 1) })
            .await?
    } else {
        csv_async::AsyncReaderBuilder::new()
            .create_reader(reader)
            .into_byte_records()
            .try_fold(0, |acc, _record| async move { Ok(acc + 1) })
            .await?
    };
    spinner.finish_with_message(format!("Found {count} records"));
    Ok((count, Some(count)))
}

/// A stream of [`serde_json::Value`] values.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Read JSONL or CSV from a file or stdin.
///
/// This function returns an async [`Stream`] of JSON objects, one per input
/// record. CSV columns all become JSON strings; downstream deserialization
/// decides what they mean.
pub async fn read_jsonl_or_csv(ui: Ui, path: Option<&Path>) -> Result<JsonStream> {
    let size_hint = match path {
        Some(path) => count_jsonl_or_csv_records(&ui, path).await?,
        None => (0, None),
    };

    let reader = SmartReader::new_from_path_or_stdin(path).await?;
    let description = Arc::new(reader.description.clone());
    if reader.is_json_like() {
        let lines = SizeHintStream::new(LinesStream::new(reader.lines()), size_hint);
        let stream = lines.then(move |line| {
            let description = description.clone();
            async move {
                let line = line?;
                let value: Value = serde_json::from_str(&line).with_context(|| {
                    format!(
                        "Failed to parse JSON from line in {:?}: {:?}",
                        description, line
                    )
                })?;
                Ok(value)
            }
        });
        Ok(Box::pin(stream))
    } else {
        let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(reader);
        let headers = Arc::new(
            reader
                .headers()
                .await
                .with_context(|| {
                    format!("Failed to read CSV headers from {:?}", description)
                })?
                .to_owned(),
        );
        let records = SizeHintStream::new(reader.into_records(), size_hint);
        let stream = records.then(move |record| {
            let description = description.clone();
            let headers = headers.clone();
            async move {
                let record = record.with_context(|| {
                    format!("Failed to read CSV record from {:?}", description)
                })?;
                let map: Map<String, Value> = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, value)| {
                        (header.to_owned(), Value::String(value.to_owned()))
                    })
                    .collect();
                Ok(Value::Object(map))
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a stream of JSON values to either standard output or a file, one
/// record per line.
pub async fn write_output(path: Option<&Path>, stream: JsonStream) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(value) = stream.next().await {
        let value = value?;
        let json = serde_json::to_string(&value)
            .with_context(|| format!("Failed to serialize JSON value: {:?}", value))?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// A [`Stream`] with an external size hint, decremented as items are
/// consumed. This is what lets a progress bar over a lazily-read input file
/// show a total.
struct SizeHintStream<S> {
    /// The stream to wrap.
    stream: S,

    /// The remaining size hint.
    size_hint: (usize, Option<usize>),
}

impl<S> SizeHintStream<S> {
    /// Create a new [`SizeHintStream`] from a stream and a size hint.
    fn new(stream: S, size_hint: (usize, Option<usize>)) -> Self {
        Self { stream, size_hint }
    }
}

impl<S> Stream for SizeHintStream<S>
where
    S: Stream + Send + Unpin + 'static,
    S::Item: Send + Unpin + 'static,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let stream = Pin::new(&mut this.stream);
        match stream.poll_next(cx) {
            Poll::Ready(Some(value)) => {
                let (lower, upper) = this.size_hint;
                this.size_hint =
                    (lower.saturating_sub(1), upper.map(|x| x.saturating_sub(1)));
                Poll::Ready(Some(value))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.size_hint
    }
}
