//! Stream framer
//!
//! Splits the telemetry command's stdout into candidate JSON objects. The
//! upstream tools pretty-print their output and give no line framing, so the
//! framer tracks object nesting byte by byte (string and escape aware) and
//! emits a candidate each time the outermost object closes. Anything between
//! objects (`[`, `,`, `]`, banner text) is ignored.

use crate::metrics::GathererMetrics;
use std::mem;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Upper bound on a single object before it is discarded
pub const DEFAULT_MAX_OBJECT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("partial object exceeded {limit} bytes, discarded {discarded} buffered bytes")]
    Overflow { limit: usize, discarded: usize },
}

/// Incremental JSON object framer
#[derive(Debug)]
pub struct Framer {
    buffer: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    max_object_bytes: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OBJECT_BYTES)
    }
}

impl Framer {
    pub fn new(max_object_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            max_object_bytes,
        }
    }

    /// True when no partial object is buffered
    pub fn is_idle(&self) -> bool {
        self.depth == 0
    }

    /// Bytes of the partial object buffered so far
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Feed one line without its terminator.
    ///
    /// Objects completed by this line are appended to `out`. A line break is
    /// kept inside an object that continues on the next line. On overflow the
    /// rest of the line is dropped and framing resumes with the next line.
    pub fn push_line(&mut self, line: &[u8], out: &mut Vec<Vec<u8>>) -> Result<(), FrameError> {
        for &byte in line {
            self.push_byte(byte, out)?;
        }
        if self.depth > 0 {
            self.buffer.push(b'\n');
            self.check_limit()?;
        }
        Ok(())
    }

    fn push_byte(&mut self, byte: u8, out: &mut Vec<Vec<u8>>) -> Result<(), FrameError> {
        if self.depth == 0 {
            if byte == b'{' {
                self.depth = 1;
                self.buffer.push(byte);
            }
            return Ok(());
        }

        self.buffer.push(byte);
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
        } else {
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        out.push(mem::take(&mut self.buffer));
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        self.check_limit()
    }

    fn check_limit(&mut self) -> Result<(), FrameError> {
        if self.buffer.len() <= self.max_object_bytes {
            return Ok(());
        }
        let discarded = self.buffer.len();
        self.reset();
        Err(FrameError::Overflow {
            limit: self.max_object_bytes,
            discarded,
        })
    }
}

/// Why the reader loop stopped
#[derive(Debug)]
pub enum StreamEnd {
    /// The source reached EOF (child exited)
    Closed,
    Cancelled,
    /// Nobody is consuming candidates anymore
    ReceiverDropped,
    ReadError(std::io::Error),
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Read `source` line by line and forward framed candidates to `sink`
/// until EOF, a read error or cancellation.
pub async fn read_candidates<R>(
    source: R,
    mut framer: Framer,
    sink: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    metrics: GathererMetrics,
) -> StreamEnd
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut line = Vec::with_capacity(4096);
    let mut candidates = Vec::new();

    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            read = reader.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => return StreamEnd::Closed,
            Ok(_) => {}
            Err(e) => return StreamEnd::ReadError(e),
        }

        let text = trim_line_end(&line);
        trace!("telemetry line: {}", String::from_utf8_lossy(text));

        if let Err(e) = framer.push_line(text, &mut candidates) {
            warn!("Dropping malformed telemetry: {}", e);
            metrics.frame_overflows.inc();
        }

        for candidate in candidates.drain(..) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                sent = sink.send(candidate) => {
                    if sent.is_err() {
                        return StreamEnd::ReceiverDropped;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(framer: &mut Framer, lines: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        for line in lines {
            framer.push_line(line.as_bytes(), &mut out).unwrap();
        }
        out.into_iter()
            .map(|c| String::from_utf8(c).unwrap())
            .collect()
    }

    #[test]
    fn test_single_line_object() {
        let mut framer = Framer::default();
        let line = r#"{"engines":{"Render/3D":{"busy":42.5,"unit":"%"}}}"#;
        assert_eq!(feed(&mut framer, &[line]), vec![line.to_string()]);
        assert!(framer.is_idle());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_object_split_across_lines() {
        let lines = [
            "{",
            "\t\"frequency\": {",
            "\t\t\"requested\": 1200,",
            "\t\t\"unit\": \"MHz\"",
            "\t}",
            "}",
        ];
        let mut framer = Framer::default();

        let partial = feed(&mut framer, &lines[..5]);
        assert!(partial.is_empty());
        assert!(!framer.is_idle());

        let done = feed(&mut framer, &lines[5..]);
        assert_eq!(done, vec![lines.join("\n")]);
    }

    #[test]
    fn test_intel_gpu_top_array_framing() {
        let lines = ["[", "{", "\"a\": 1", "},", "{", "\"a\": 2", "}", "]"];
        let mut framer = Framer::default();
        let out = feed(&mut framer, &lines);
        assert_eq!(out, vec!["{\n\"a\": 1\n}", "{\n\"a\": 2\n}"]);
        assert!(framer.is_idle());
    }

    #[test]
    fn test_braces_inside_strings() {
        let line = r#"{"Name":"GPU {0} \"x}\\","Utilization":1}"#;
        let mut framer = Framer::default();
        assert_eq!(feed(&mut framer, &[line]), vec![line.to_string()]);
    }

    #[test]
    fn test_two_objects_on_one_line() {
        let mut framer = Framer::default();
        let out = feed(&mut framer, &[r#"{"a":1}{"b":[1,{"c":2}]}"#]);
        assert_eq!(out, vec![r#"{"a":1}"#, r#"{"b":[1,{"c":2}]}"#]);
    }

    #[test]
    fn test_truncated_object_never_emits() {
        let mut framer = Framer::default();
        let out = feed(&mut framer, &["{", "\"engines\": {", "\"Video\": {\"busy\": 1"]);
        assert!(out.is_empty());
        assert!(!framer.is_idle());
    }

    #[test]
    fn test_overflow_discards_partial_object() {
        let mut framer = Framer::new(16);
        let mut out = Vec::new();
        let err = framer
            .push_line(br#"{"a": "0123456789abcdef"}"#, &mut out)
            .unwrap_err();
        assert!(matches!(err, FrameError::Overflow { limit: 16, .. }));
        assert!(out.is_empty());
        assert!(framer.is_idle());

        framer.push_line(br#"{"b":1}"#, &mut out).unwrap();
        assert_eq!(out, vec![br#"{"b":1}"#.to_vec()]);
    }

    #[test]
    fn test_overflow_inside_string_drops_rest_of_line() {
        let mut framer = Framer::new(16);
        let mut out = Vec::new();
        let err = framer
            .push_line(br#"{"a":"0123456789abcdef{"}{"x":1}"#, &mut out)
            .unwrap_err();
        assert!(matches!(err, FrameError::Overflow { limit: 16, .. }));
        assert!(out.is_empty());
        assert!(framer.is_idle());

        for _ in 0..3 {
            framer.push_line(br#"{"b":1}"#, &mut out).unwrap();
        }
        assert_eq!(out, vec![br#"{"b":1}"#.to_vec(); 3]);
    }

    #[tokio::test]
    async fn test_read_candidates_across_reads() {
        let source = tokio_test::io::Builder::new()
            .read(b"[\r\n{\"a\":")
            .read(b"1}\r\n,\n{\"b\"")
            .read(b":2}\n")
            .build();
        let (tx, mut rx) = mpsc::channel(8);
        let metrics = GathererMetrics::new("test").unwrap();

        let end = read_candidates(
            source,
            Framer::default(),
            tx,
            CancellationToken::new(),
            metrics,
        )
        .await;
        assert!(matches!(end, StreamEnd::Closed));

        assert_eq!(rx.recv().await.unwrap(), br#"{"a":1}"#.to_vec());
        assert_eq!(rx.recv().await.unwrap(), br#"{"b":2}"#.to_vec());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_read_candidates_counts_overflow() {
        let source = tokio_test::io::Builder::new()
            .read(b"{\"a\": \"0123456789abcdef0123456789\"}\n{\"b\":1}\n")
            .build();
        let (tx, mut rx) = mpsc::channel(8);
        let metrics = GathererMetrics::new("test").unwrap();

        read_candidates(
            source,
            Framer::new(16),
            tx,
            CancellationToken::new(),
            metrics.clone(),
        )
        .await;

        assert_eq!(metrics.frame_overflows.get(), 1);
        assert_eq!(rx.recv().await.unwrap(), br#"{"b":1}"#.to_vec());
    }

    #[tokio::test]
    async fn test_read_candidates_stops_on_cancel() {
        let (_writer, reader) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let end = read_candidates(
            reader,
            Framer::default(),
            tx,
            cancel,
            GathererMetrics::new("test").unwrap(),
        )
        .await;
        assert!(matches!(end, StreamEnd::Cancelled));
    }
}
