//! Transcoder pipeline
//!
//! Probes inputs with an ffprobe-compatible binary, builds deterministic
//! ffmpeg argv vectors with smart stream-copy vs re-encode selection, and
//! manages the spawned process whose stdout carries MPEG-TS.

pub mod command;
pub mod probe;
pub mod stream;

pub use command::{build_transcode_command, clamp_seek_offset, TranscodeOptions};
pub use probe::{probe_stream, CodecInfo};
pub use stream::{spawn_transcoder, ProcessHandle, TranscodeError, TranscodeStream};
