//! Line-delimited JSON protocol spoken by the extraction workers.
//!
//! ## Why a byte-level reader?
//!
//! Worker stdout arrives in arbitrary chunks. A chunk boundary can fall in the
//! middle of a line and, with Vietnamese file names, in the middle of a
//! multi-byte UTF-8 sequence. Splitting on `\n` at the byte level and decoding
//! only complete lines means a split character is never mangled.
//!
//! Workers also print noise (model-loading chatter, library warnings) on the
//! same stream. Anything that is not a recognised event is dropped silently:
//!
//! ```text
//! {"type":"loading"}                                      ignored
//! Downloading weights ...                                 ignored
//! {"type":"converted","index":0,"file":"a.pdf","chars":1834}
//! {"type":"error","index":1,"file":"b.pdf","error":"..."}
//! {"type":"done"}                                         ignored
//! ```
//!
//! [`spawn_event_channel`] wraps one worker's stdout in a reader task and hands
//! back a typed receiver, so the dispatcher can merge several workers into a
//! single stream.

use serde::Deserialize;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 8 * 1024;

/// A recognised worker event. `index` refers to the worker's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerEvent {
    Converted {
        index: usize,
        #[serde(default)]
        file: String,
        #[serde(default)]
        chars: usize,
    },
    Error {
        index: usize,
        #[serde(default)]
        file: String,
        #[serde(default)]
        error: String,
    },
}

impl WorkerEvent {
    pub fn index(&self) -> usize {
        match self {
            WorkerEvent::Converted { index, .. } | WorkerEvent::Error { index, .. } => *index,
        }
    }
}

/// Parse one line. Returns `None` for noise, unknown event types and
/// malformed events.
pub fn parse_event(line: &str) -> Option<WorkerEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Incremental newline splitter over raw bytes.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line[..pos]));
        }
        lines
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    s.strip_suffix('\r').unwrap_or(s.as_ref()).to_string()
}

/// Read `reader` to EOF, calling `on_line` for every line including an
/// unterminated final one.
pub async fn read_lines<R, F>(mut reader: R, mut on_line: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut decoder = LineDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for line in decoder.push(&chunk[..n]) {
            on_line(&line);
        }
    }
    if let Some(line) = decoder.finish() {
        on_line(&line);
    }
    Ok(())
}

/// Read `reader` to EOF, calling `on_event` for every recognised event.
pub async fn read_events<R, F>(reader: R, mut on_event: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(WorkerEvent),
{
    read_lines(reader, |line| {
        if let Some(event) = parse_event(line) {
            on_event(event);
        }
    })
    .await
}

/// Spawn a reader task over one worker's stdout.
///
/// The receiver closes when the stream reaches EOF; the handle reports any
/// read error.
pub fn spawn_event_channel(
    reader: Pin<Box<dyn AsyncRead + Send>>,
) -> (
    mpsc::UnboundedReceiver<WorkerEvent>,
    JoinHandle<std::io::Result<()>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        read_events(reader, |event| {
            // A dropped receiver just means nobody is listening any more.
            let _ = tx.send(event);
        })
        .await
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_converted_event() {
        let ev = parse_event(r#"{"type":"converted","index":3,"file":"a.pdf","chars":120}"#);
        assert_eq!(
            ev,
            Some(WorkerEvent::Converted {
                index: 3,
                file: "a.pdf".into(),
                chars: 120
            })
        );
    }

    #[test]
    fn parses_error_event() {
        let ev = parse_event(r#"{"type":"error","index":1,"file":"b.pdf","error":"boom"}"#).unwrap();
        assert_eq!(ev.index(), 1);
        assert!(matches!(ev, WorkerEvent::Error { ref error, .. } if error == "boom"));
    }

    #[test]
    fn ignores_noise_and_unknown_types() {
        assert_eq!(parse_event("Loading model weights..."), None);
        assert_eq!(parse_event(r#"{"type":"loading"}"#), None);
        assert_eq!(parse_event(r#"{"type":"done","total":4}"#), None);
        assert_eq!(parse_event(r#"{"type":"converted","index":"x"}"#), None);
        assert_eq!(parse_event(r#"{"type":"converted""#), None);
        assert_eq!(parse_event(""), None);
    }

    #[test]
    fn decoder_keeps_partial_line_until_newline() {
        let mut d = LineDecoder::new();
        assert!(d.push(b"abc").is_empty());
        assert_eq!(d.push(b"def\nxy"), vec!["abcdef".to_string()]);
        assert_eq!(d.finish().as_deref(), Some("xy"));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn decoder_strips_carriage_return() {
        let mut d = LineDecoder::new();
        assert_eq!(d.push(b"a\r\nb\n"), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn multibyte_char_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"converted\",\"index\":0,\"file\":\"Lu\xe1\xba")
            .read(b"\xadt.pdf\",\"chars\":10}\n")
            .build();
        let mut events = Vec::new();
        read_events(mock, |e| events.push(e)).await.unwrap();
        assert_eq!(
            events,
            vec![WorkerEvent::Converted {
                index: 0,
                file: "Luật.pdf".into(),
                chars: 10
            }]
        );
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_flushed() {
        let mock = tokio_test::io::Builder::new()
            .read(b"noise line\n{\"type\":\"loaded\"}\n")
            .read(b"{\"type\":\"error\",\"index\":2,\"file\":\"c.pdf\",\"error\":\"bad\"}")
            .build();
        let mut events = Vec::new();
        read_events(mock, |e| events.push(e)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index(), 2);
    }

    #[tokio::test]
    async fn event_channel_yields_events_then_closes() {
        let bytes = b"{\"type\":\"converted\",\"index\":0,\"chars\":5}\njunk\n\
{\"type\":\"converted\",\"index\":1,\"chars\":7}\n"
            .to_vec();
        let (mut rx, handle) = spawn_event_channel(Box::pin(Cursor::new(bytes)));
        let mut got = Vec::new();
        while let Some(ev) = rx.recv().await {
            got.push(ev.index());
        }
        handle.await.unwrap().unwrap();
        assert_eq!(got, vec![0, 1]);
    }
}
