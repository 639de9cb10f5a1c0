//! QR scanning as an explicit state machine.
//!
//! A [`QrScanner`] drives a [`QrSource`] (camera pipeline, decoder process,
//! piped text) until the first payload decodes, stops the source exactly
//! once, and only then hands the payload to the [`LookupResolver`]:
//!
//! ```text
//! Idle ──start──▶ Scanning ──decode──▶ Decoded ──stop──▶ Stopped ──▶ lookup
//!                    │
//!                    └──exhausted / failed──▶ Stopped
//! ```

use crate::error::FrameError;
use crate::lookup_resolver::{LookupInput, LookupResolver};
use crate::record_gateway::Frame;
use async_trait::async_trait;
use thiserror::Error;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

/// Prefix `zbarcam` puts in front of QR payloads unless run with `--raw`
const ZBAR_QR_PREFIX: &str = "QR-Code:";

/// Errors that can occur while scanning
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Camera access failed: {0}")]
    SourceUnavailable(String),

    #[error("Error reading QR payloads: {0}")]
    SourceFailed(String),

    #[error("No QR code was decoded")]
    NoCodeDecoded,

    #[error("Scanner has already run")]
    AlreadyUsed,

    #[error(transparent)]
    Lookup(#[from] FrameError),
}

/// State of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Decoded(String),
    Stopped,
}

/// A continuous source of decoded QR payloads
#[async_trait]
pub trait QrSource: Send {
    /// Begin capturing
    async fn start(&mut self) -> Result<(), ScanError>;

    /// Next decoded payload; `None` once the source is exhausted
    async fn next_payload(&mut self) -> Result<Option<String>, ScanError>;

    /// Stop capturing
    async fn stop(&mut self);
}

/// Result of a completed scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// The decoded text
    pub payload: String,
    /// The frame it names, if any
    pub frame: Option<Frame>,
}

/// Single-use scanner over a payload source
pub struct QrScanner<S: QrSource> {
    source: S,
    state: ScanState,
}

impl<S: QrSource> QrScanner<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Consume the scanner and hand back its source
    pub fn into_source(self) -> S {
        self.source
    }

    /// Scan until the first payload decodes, then look it up
    pub async fn scan(&mut self, resolver: &LookupResolver) -> Result<ScanOutcome, ScanError> {
        if self.state != ScanState::Idle {
            return Err(ScanError::AlreadyUsed);
        }

        if let Err(e) = self.source.start().await {
            self.transition(ScanState::Stopped);
            return Err(e);
        }
        self.transition(ScanState::Scanning);

        let payload = loop {
            match self.source.next_payload().await {
                Ok(Some(payload)) if payload.trim().is_empty() => continue,
                Ok(Some(payload)) => break payload,
                Ok(None) => {
                    self.halt().await;
                    return Err(ScanError::NoCodeDecoded);
                }
                Err(e) => {
                    self.halt().await;
                    return Err(e);
                }
            }
        };

        info!(payload = %payload, "QR code decoded");
        self.transition(ScanState::Decoded(payload.clone()));
        self.halt().await;

        let frame = resolver
            .open(&LookupInput::Scanned(payload.clone()))
            .await?;

        Ok(ScanOutcome { payload, frame })
    }

    async fn halt(&mut self) {
        self.source.stop().await;
        self.transition(ScanState::Stopped);
    }

    fn transition(&mut self, next: ScanState) {
        debug!(from = ?self.state, to = ?next, "Scanner state change");
        self.state = next;
    }
}

/// Payloads read line by line, e.g. from `zbarcam` piped to stdin
pub struct LineQrSource<R> {
    lines: Lines<R>,
    stopped: bool,
}

impl<R: AsyncBufRead + Unpin + Send> LineQrSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            stopped: false,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> QrSource for LineQrSource<R> {
    async fn start(&mut self) -> Result<(), ScanError> {
        Ok(())
    }

    async fn next_payload(&mut self) -> Result<Option<String>, ScanError> {
        if self.stopped {
            return Ok(None);
        }
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| ScanError::SourceFailed(e.to_string()))?;

        Ok(line.map(|l| {
            l.strip_prefix(ZBAR_QR_PREFIX)
                .unwrap_or(&l)
                .trim()
                .to_string()
        }))
    }

    async fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Payloads from a decoder process writing one per line, e.g. `zbarcam --raw`
pub struct ProcessQrSource {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    lines: Option<LineQrSource<BufReader<ChildStdout>>>,
}

impl ProcessQrSource {
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            child: None,
            lines: None,
        }
    }

    /// Split a command line such as `"zbarcam --raw /dev/video0"`
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program, words))
    }
}

#[async_trait]
impl QrSource for ProcessQrSource {
    async fn start(&mut self) -> Result<(), ScanError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::SourceUnavailable(format!("{}: {e}", self.program)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ScanError::SourceUnavailable(format!("{}: no output stream", self.program))
        })?;

        debug!(program = %self.program, "Decoder process started");
        self.lines = Some(LineQrSource::new(BufReader::new(stdout)));
        self.child = Some(child);
        Ok(())
    }

    async fn next_payload(&mut self) -> Result<Option<String>, ScanError> {
        match self.lines.as_mut() {
            Some(lines) => lines.next_payload().await,
            None => Ok(None),
        }
    }

    async fn stop(&mut self) {
        self.lines = None;
        if let Some(mut child) = self.child.take() {
            // Already exited when the decoder reached end of input.
            if let Err(e) = child.kill().await {
                debug!(error = %e, program = %self.program, "Decoder process not killed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_service::FrameService;
    use crate::record_gateway::MockFrameRecords;
    use crate::storage_gateway::MockObjectStore;
    use chrono::Utc;
    use mockall::predicate::eq;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Source replaying canned payloads and counting lifecycle calls
    struct ScriptedSource {
        payloads: VecDeque<String>,
        fail_start: bool,
        starts: usize,
        stops: usize,
        reads_after_stop: usize,
    }

    impl ScriptedSource {
        fn new(payloads: &[&str]) -> Self {
            Self {
                payloads: payloads.iter().map(|p| p.to_string()).collect(),
                fail_start: false,
                starts: 0,
                stops: 0,
                reads_after_stop: 0,
            }
        }
    }

    #[async_trait]
    impl QrSource for ScriptedSource {
        async fn start(&mut self) -> Result<(), ScanError> {
            self.starts += 1;
            if self.fail_start {
                return Err(ScanError::SourceUnavailable("permission denied".to_string()));
            }
            Ok(())
        }

        async fn next_payload(&mut self) -> Result<Option<String>, ScanError> {
            if self.stops > 0 {
                self.reads_after_stop += 1;
            }
            Ok(self.payloads.pop_front())
        }

        async fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn resolver(expected_lookups: usize) -> LookupResolver {
        let mut records = MockFrameRecords::new();
        records
            .expect_get_by_id()
            .with(eq("42"))
            .times(expected_lookups)
            .returning(|_| {
                Ok(Frame {
                    id: 42,
                    user_id: Uuid::new_v4(),
                    title: "Wedding".to_string(),
                    description: String::new(),
                    photo_url: "p".to_string(),
                    video_url: "v".to_string(),
                    created_at: Utc::now(),
                })
            });
        let service = FrameService::new(
            Arc::new(MockObjectStore::new()),
            Arc::new(records),
            50 * 1024 * 1024,
        );
        LookupResolver::new(Arc::new(service))
    }

    #[tokio::test]
    async fn test_first_decode_stops_once_and_looks_up_once() {
        let source = ScriptedSource::new(&["", "https://x/scan?frame=42", "99"]);
        let mut scanner = QrScanner::new(source);
        assert_eq!(scanner.state(), &ScanState::Idle);

        let outcome = scanner.scan(&resolver(1)).await.unwrap();
        assert_eq!(outcome.payload, "https://x/scan?frame=42");
        assert_eq!(outcome.frame.map(|f| f.id), Some(42));
        assert_eq!(scanner.state(), &ScanState::Stopped);

        let source = scanner.into_source();
        assert_eq!(source.starts, 1);
        assert_eq!(source.stops, 1);
        assert_eq!(source.reads_after_stop, 0);
        assert_eq!(source.payloads.len(), 1);
    }

    #[tokio::test]
    async fn test_scanner_is_single_use() {
        let mut scanner = QrScanner::new(ScriptedSource::new(&["42"]));
        scanner.scan(&resolver(1)).await.unwrap();

        let err = scanner.scan(&resolver(0)).await.unwrap_err();
        assert!(matches!(err, ScanError::AlreadyUsed));
        assert_eq!(scanner.into_source().stops, 1);
    }

    #[tokio::test]
    async fn test_exhausted_source_stops_without_lookup() {
        let mut scanner = QrScanner::new(ScriptedSource::new(&["  "]));

        let err = scanner.scan(&resolver(0)).await.unwrap_err();
        assert!(matches!(err, ScanError::NoCodeDecoded));
        assert_eq!(scanner.state(), &ScanState::Stopped);
        assert_eq!(scanner.into_source().stops, 1);
    }

    #[tokio::test]
    async fn test_start_failure_never_stops() {
        let mut source = ScriptedSource::new(&["42"]);
        source.fail_start = true;
        let mut scanner = QrScanner::new(source);

        let err = scanner.scan(&resolver(0)).await.unwrap_err();
        assert_eq!(err.to_string(), "Camera access failed: permission denied");
        assert_eq!(scanner.state(), &ScanState::Stopped);
        assert_eq!(scanner.into_source().stops, 0);
    }

    #[tokio::test]
    async fn test_line_source_strips_zbar_prefix() {
        let reader = tokio_test::io::Builder::new()
            .read(b"QR-Code:https://x/scan?frame=42\n42\n")
            .build();
        let mut source = LineQrSource::new(tokio::io::BufReader::new(reader));

        source.start().await.unwrap();
        assert_eq!(
            source.next_payload().await.unwrap().as_deref(),
            Some("https://x/scan?frame=42")
        );
        source.stop().await;
        assert_eq!(source.next_payload().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_decoder_is_unavailable() {
        let mut source = ProcessQrSource::new("memoryframe-no-such-decoder", ["--raw"]);
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, ScanError::SourceUnavailable(_)));
        assert!(err
            .to_string()
            .starts_with("Camera access failed: memoryframe-no-such-decoder"));
        assert_eq!(source.next_payload().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_process_payloads() {
        let source = ProcessQrSource::new("sh", ["-c", "echo 'QR-Code:42'; sleep 30"]);
        let mut scanner = QrScanner::new(source);

        let outcome = scanner.scan(&resolver(1)).await.unwrap();
        assert_eq!(outcome.payload, "42");
        assert_eq!(scanner.state(), &ScanState::Stopped);
        assert!(scanner.into_source().child.is_none());
    }

    #[test]
    fn test_decoder_command_line() {
        let source = ProcessQrSource::from_command_line("zbarcam --raw /dev/video0").unwrap();
        assert_eq!(source.program, "zbarcam");
        assert_eq!(source.args, vec!["--raw", "/dev/video0"]);
        assert!(ProcessQrSource::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_line_source_end_of_input() {
        let reader = tokio_test::io::Builder::new().read(b"42\n").build();
        let mut source = LineQrSource::new(tokio::io::BufReader::new(reader));

        assert_eq!(source.next_payload().await.unwrap().as_deref(), Some("42"));
        assert_eq!(source.next_payload().await.unwrap(), None);
    }
}
