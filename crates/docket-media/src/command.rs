//! FFmpeg command builder.

use std::path::PathBuf;

use crate::error::{MediaError, MediaResult};

/// FFmpeg's name for standard input.
pub const PIPE_IN: &str = "pipe:0";
/// FFmpeg's name for standard output.
pub const PIPE_OUT: &str = "pipe:1";

/// Builder for FFmpeg argument lists.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path or pipe
    input: String,
    /// Output file path or pipe
    output: String,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// Read from stdin, write to stdout.
    pub fn piped() -> Self {
        Self::new(PIPE_IN, PIPE_OUT)
    }

    /// Normalize any audio or video input to 16 kHz mono WAV.
    pub fn mono_wav_16k() -> Self {
        Self::piped()
            .no_video()
            .audio_channels(1)
            .sample_rate(16_000)
            .format("wav")
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Drop video streams.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    pub fn audio_channels(self, channels: u8) -> Self {
        self.output_arg("-ac").output_arg(channels.to_string())
    }

    pub fn sample_rate(self, hz: u32) -> Self {
        self.output_arg("-ar").output_arg(hz.to_string())
    }

    /// Force the output container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
        ];

        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.clone());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone());

        args
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::TranscoderNotFound("ffmpeg".to_string()))
}
