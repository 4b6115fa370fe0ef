//! Media normalization for transcription.
//!
//! This crate provides:
//! - FFmpeg argument building for pipe-to-pipe transcodes
//! - A subprocess transcoder with bounded output and stderr capture
//! - Size-bounded HTTP media download

pub mod command;
pub mod download;
pub mod error;
pub mod metrics;
pub mod transcoder;

pub use command::{check_ffmpeg, FfmpegCommand};
pub use download::{download_media_buffer, DownloadedMedia};
pub use error::{MediaError, MediaResult};
pub use transcoder::{MediaBuffer, MediaTranscoder, TranscodeState, TranscoderConfig, WAV_MIME};
