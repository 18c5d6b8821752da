//! Audio tooling.
//!
//! The [`AudioTool`] trait is the single seam between the assembly engine and
//! whatever performs signal work: [`FfmpegTool`] drives the ffmpeg binaries,
//! [`WavTool`] works natively on WAV files.

pub mod ffmpeg;
pub mod native;
pub mod tool;
pub mod wav;

// Re-export commonly used items
pub use ffmpeg::FfmpegTool;
pub use native::WavTool;
pub use tool::{
    ensure_output, trim_span, AudioTool, DelayedInput, SilenceParams, ToolError, ToolResult,
    TrimParams,
};
pub use wav::{read_wav, samples_to_duration, write_wav, write_wav_to_buffer, Pcm};
