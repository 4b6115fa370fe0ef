//! Audio normalization through an FFmpeg child process.
//!
//! Input bytes are streamed to the child's stdin by a writer task while the
//! caller's task reads stdout and stderr concurrently, so neither pipe can
//! fill up and deadlock the child. Output is bounded: crossing the ceiling
//! kills the child.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::metrics;

/// Default ceiling for input and output buffers (25 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 25 * 1024 * 1024;

/// Mime type of normalized output.
pub const WAV_MIME: &str = "audio/wav";

const STDOUT_CHUNK: usize = 64 * 1024;
const STDERR_CHUNK: usize = 8 * 1024;

/// Transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Transcoder executable
    pub program: String,
    /// Inputs larger than this are rejected before spawning
    pub max_input_bytes: u64,
    /// Default output ceiling
    pub max_output_bytes: u64,
    /// Bytes of stderr kept for error reports (the tail is kept)
    pub stderr_limit: usize,
    /// Wall-clock limit for a single transcode
    pub timeout: Duration,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            max_input_bytes: DEFAULT_MAX_BYTES,
            max_output_bytes: DEFAULT_MAX_BYTES,
            stderr_limit: 64 * 1024,
            timeout: Duration::from_secs(600),
        }
    }
}

impl TranscoderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            program: std::env::var("FFMPEG_PATH").unwrap_or(defaults.program),
            max_input_bytes: std::env::var("MEDIA_MAX_INPUT_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_input_bytes),
            max_output_bytes: std::env::var("MEDIA_MAX_OUTPUT_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_output_bytes),
            stderr_limit: defaults.stderr_limit,
            timeout: std::env::var("MEDIA_TRANSCODE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// Media bytes plus their mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBuffer {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// False when the input was passed through unchanged
    pub transcoded: bool,
}

/// Lifecycle of one transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Spawned,
    Streaming,
    Completed,
    Errored,
    Killed,
}

impl TranscodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeState::Spawned => "spawned",
            TranscodeState::Streaming => "streaming",
            TranscodeState::Completed => "completed",
            TranscodeState::Errored => "errored",
            TranscodeState::Killed => "killed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    fn from_mime(mime_type: &str) -> MediaResult<Self> {
        let essence = mime_type.split(';').next().unwrap_or("").trim();
        if essence.starts_with("audio/") {
            Ok(MediaKind::Audio)
        } else if essence.starts_with("video/") {
            Ok(MediaKind::Video)
        } else {
            Err(MediaError::unsupported_format(mime_type))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum KillReason {
    OutputLimit,
    Timeout,
}

/// Keeps the most recent `limit` bytes written to it.
struct TailBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.limit {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
        }
    }

    fn into_string(self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.bytes).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Converts audio and video to 16 kHz mono WAV.
pub struct MediaTranscoder {
    config: TranscoderConfig,
    args: Vec<String>,
}

impl MediaTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            config,
            args: FfmpegCommand::mono_wav_16k().build_args(),
        }
    }

    /// Replace the program and its arguments.
    pub fn with_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.config.program = program.into();
        self.args = args;
        self
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Transcode `input` to mono 16 kHz WAV, capping output at `size_limit`.
    ///
    /// When the transcoder binary is missing, audio input is returned
    /// unchanged with its original mime type; video input fails.
    pub async fn transcode_to_mono_wav(
        &self,
        input: Vec<u8>,
        mime_type: &str,
        size_limit: u64,
    ) -> MediaResult<MediaBuffer> {
        let kind = MediaKind::from_mime(mime_type)?;

        if input.len() as u64 > self.config.max_input_bytes {
            return Err(MediaError::SizeExceeded {
                limit: self.config.max_input_bytes,
            });
        }

        let started = Instant::now();
        let input_len = input.len();

        let mut child = match Command::new(&self.config.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if kind == MediaKind::Audio {
                    warn!(
                        program = %self.config.program,
                        mime_type = %mime_type,
                        "Transcoder not found; passing audio through unchanged"
                    );
                    metrics::record_passthrough();
                    return Ok(MediaBuffer {
                        bytes: input,
                        mime_type: mime_type.to_string(),
                        transcoded: false,
                    });
                }
                return Err(MediaError::TranscoderNotFound(self.config.program.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = TranscodeState::Spawned;
        debug!(program = %self.config.program, input_bytes = input_len, state = state.as_str(), "Transcoder spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("transcoder stdin not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("transcoder stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("transcoder stderr not captured"))?;

        let writer = spawn_stdin_writer(stdin, input);

        let mut output = Vec::new();
        let mut stderr_tail = TailBuffer::new(self.config.stderr_limit);
        let mut out_chunk = vec![0u8; STDOUT_CHUNK];
        let mut err_chunk = vec![0u8; STDERR_CHUNK];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut read_error = None;
        let mut kill_reason = None;

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        state = TranscodeState::Streaming;
        while stdout_open || stderr_open {
            tokio::select! {
                read = stdout.read(&mut out_chunk), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        if (output.len() + n) as u64 > size_limit {
                            kill_reason = Some(KillReason::OutputLimit);
                            state = TranscodeState::Killed;
                            break;
                        }
                        output.extend_from_slice(&out_chunk[..n]);
                    }
                    Err(e) => {
                        read_error = Some(e);
                        state = TranscodeState::Errored;
                        break;
                    }
                },
                read = stderr.read(&mut err_chunk), if stderr_open => match read {
                    Ok(0) | Err(_) => stderr_open = false,
                    Ok(n) => stderr_tail.push(&err_chunk[..n]),
                },
                _ = &mut deadline => {
                    kill_reason = Some(KillReason::Timeout);
                    state = TranscodeState::Killed;
                    break;
                }
            }
        }

        match state {
            TranscodeState::Killed => {
                writer.abort();
                kill_child(&mut child).await;
                let reason = kill_reason.unwrap_or(KillReason::OutputLimit);
                warn!(
                    program = %self.config.program,
                    output_bytes = output.len(),
                    size_limit,
                    reason = ?reason,
                    state = state.as_str(),
                    "Transcoder killed"
                );
                metrics::record_transcode("killed", started.elapsed());
                return Err(match reason {
                    KillReason::OutputLimit => {
                        metrics::record_kill("output_limit");
                        MediaError::SizeExceeded { limit: size_limit }
                    }
                    KillReason::Timeout => {
                        metrics::record_kill("timeout");
                        MediaError::Timeout(self.config.timeout.as_secs())
                    }
                });
            }
            TranscodeState::Errored => {
                writer.abort();
                kill_child(&mut child).await;
                metrics::record_transcode("errored", started.elapsed());
                return Err(read_error
                    .map(MediaError::from)
                    .unwrap_or_else(|| MediaError::internal("transcoder output read failed")));
            }
            _ => {}
        }

        let status = child.wait().await?;
        let write_result = drain_writer(writer).await;
        let stderr_text = stderr_tail.into_string();

        if !status.success() {
            state = TranscodeState::Errored;
            debug!(state = state.as_str(), exit_code = ?status.code(), "Transcoder exited with failure");
            metrics::record_transcode("failed", started.elapsed());
            return Err(MediaError::transcode_failed(
                format!("{} exited with {}", self.config.program, status),
                stderr_text,
                status.code(),
            ));
        }

        if let Err(e) = write_result {
            state = TranscodeState::Errored;
            debug!(state = state.as_str(), error = %e, "Transcoder input write failed");
            metrics::record_transcode("errored", started.elapsed());
            return Err(e);
        }

        state = TranscodeState::Completed;
        info!(
            input_bytes = input_len,
            output_bytes = output.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            state = state.as_str(),
            "Transcode complete"
        );
        metrics::record_transcode("completed", started.elapsed());

        Ok(MediaBuffer {
            bytes: output,
            mime_type: WAV_MIME.to_string(),
            transcoded: true,
        })
    }
}

/// Write all input then close stdin. A closed pipe means the child stopped
/// reading early, which its exit status reports better than we can.
fn spawn_stdin_writer(mut stdin: ChildStdin, input: Vec<u8>) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        let result = match stdin.write_all(&input).await {
            Ok(()) => stdin.shutdown().await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    })
}

async fn drain_writer(writer: JoinHandle<std::io::Result<()>>) -> MediaResult<()> {
    match writer.await {
        Ok(result) => result.map_err(MediaError::from),
        Err(e) => Err(MediaError::internal(format!("stdin writer task failed: {e}"))),
    }
}

async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Transcoder kill failed (already exited?)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> MediaTranscoder {
        MediaTranscoder::new(TranscoderConfig {
            program: "docket-no-such-transcoder".to_string(),
            ..Default::default()
        })
    }

    #[cfg(unix)]
    fn shell(script: &str) -> MediaTranscoder {
        MediaTranscoder::new(TranscoderConfig::default())
            .with_command("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_oversized_input_rejected_before_spawn() {
        let input = vec![0u8; 30 * 1024 * 1024];
        let err = missing()
            .transcode_to_mono_wav(input, "audio/mpeg", DEFAULT_MAX_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SizeExceeded { .. }));
        assert!(err.to_string().contains("exceeds maximum size"));
    }

    #[tokio::test]
    async fn test_unsupported_mime() {
        let err = missing()
            .transcode_to_mono_wav(b"%PDF".to_vec(), "application/pdf", DEFAULT_MAX_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_missing_transcoder_passes_audio_through() {
        let input = b"ID3 fake mp3".to_vec();
        let buffer = missing()
            .transcode_to_mono_wav(input.clone(), "audio/mpeg", DEFAULT_MAX_BYTES)
            .await
            .unwrap();
        assert_eq!(buffer.bytes, input);
        assert_eq!(buffer.mime_type, "audio/mpeg");
        assert!(!buffer.transcoded);
    }

    #[tokio::test]
    async fn test_missing_transcoder_fails_video() {
        let err = missing()
            .transcode_to_mono_wav(b"fake mp4".to_vec(), "video/mp4", DEFAULT_MAX_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TranscoderNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_output() {
        let input = vec![7u8; 300_000];
        let buffer = shell("cat")
            .transcode_to_mono_wav(input.clone(), "video/mp4", DEFAULT_MAX_BYTES)
            .await
            .unwrap();
        assert_eq!(buffer.bytes, input);
        assert_eq!(buffer.mime_type, WAV_MIME);
        assert!(buffer.transcoded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_over_limit_kills_child() {
        let err = shell("cat")
            .transcode_to_mono_wav(vec![1u8; 10_000], "audio/ogg", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SizeExceeded { limit: 100 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let err = shell("echo 'Invalid data found when processing input' >&2; exit 3")
            .transcode_to_mono_wav(b"garbage".to_vec(), "audio/wav", DEFAULT_MAX_BYTES)
            .await
            .unwrap_err();
        match err {
            MediaError::TranscodeFailed {
                stderr, exit_code, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.unwrap_or_default().contains("Invalid data found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_tail_buffer_keeps_most_recent_bytes() {
        let mut tail = TailBuffer::new(4);
        tail.push(b"abc");
        tail.push(b"defg");
        assert_eq!(tail.into_string().as_deref(), Some("defg"));
        assert_eq!(TailBuffer::new(4).into_string(), None);
    }
}
