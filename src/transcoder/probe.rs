//! Input probing via an ffprobe-compatible binary

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Codecs that can be stream-copied as H.264 into MPEG-TS
const H264_COMPATIBLE_CODECS: [&str; 3] = ["h264", "avc", "avc1"];

/// HEVC codecs that can be stream-copied (with the hevc annex-B filter)
const HEVC_COMPATIBLE_CODECS: [&str; 4] = ["hevc", "h265", "hev1", "hvc1"];

/// Audio codecs MPEG-TS can carry without transcoding
const AUDIO_COMPATIBLE_CODECS: [&str; 5] = ["aac", "mp3", "mp2", "ac3", "eac3"];

/// MPEG-4 family codecs; hardware decode is disabled for these
const MPEG4_CODECS: [&str; 4] = ["mpeg4", "msmpeg4v3", "msmpeg4v2", "msmpeg4"];

/// Probed information about an input's streams
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodecInfo {
    pub video_codec: String,
    pub audio_codec: String,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    /// Container duration in seconds, 0.0 when unknown
    pub duration: f64,
    pub can_copy_video: bool,
    pub can_copy_audio: bool,
    pub is_hevc: bool,
}

impl CodecInfo {
    pub fn is_mpeg4(&self) -> bool {
        MPEG4_CODECS.contains(&self.video_codec.as_str())
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize, Default)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

fn parse_framerate(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(30.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den != 0.0 {
                num / den
            } else {
                30.0
            }
        }
        None => raw.parse().unwrap_or(30.0),
    }
}

/// Parse ffprobe JSON output into a `CodecInfo`.
pub fn parse_probe_output(json: &str) -> CodecInfo {
    let mut info = CodecInfo::default();

    let parsed: ProbeOutput = match serde_json::from_str(json) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Failed to parse probe output: {}", e);
            return info;
        }
    };

    if let Some(duration) = parsed.format.duration.as_deref().and_then(|d| d.parse().ok()) {
        info.duration = duration;
    }

    for stream in &parsed.streams {
        match stream.codec_type.as_deref() {
            Some("video") => {
                info.video_codec = stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string());
                info.width = stream.width.unwrap_or(0);
                info.height = stream.height.unwrap_or(0);
                info.framerate = stream
                    .r_frame_rate
                    .as_deref()
                    .map(parse_framerate)
                    .unwrap_or(30.0);

                let is_h264 = H264_COMPATIBLE_CODECS.contains(&info.video_codec.as_str());
                let is_hevc = HEVC_COMPATIBLE_CODECS.contains(&info.video_codec.as_str());
                info.can_copy_video = is_h264 || is_hevc;
                info.is_hevc = is_hevc;

                if info.duration == 0.0 {
                    if let Some(duration) = stream.duration.as_deref().and_then(|d| d.parse().ok()) {
                        info.duration = duration;
                    }
                }
            }
            Some("audio") => {
                info.audio_codec = stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string());
                info.can_copy_audio = AUDIO_COMPATIBLE_CODECS.contains(&info.audio_codec.as_str());
            }
            _ => {}
        }
    }

    info
}

/// Probe an input for codec information.
///
/// Failures degrade to a default `CodecInfo` (forcing the safe full-transcode
/// path) rather than aborting the playout attempt.
pub async fn probe_stream(ffprobe_path: &str, input_url: &str, timeout: Duration) -> CodecInfo {
    let mut cmd = Command::new(ffprobe_path);
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        input_url,
    ])
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::warn!("Failed to run probe on {}: {}", input_url, e);
            return CodecInfo::default();
        }
        Err(_) => {
            tracing::warn!("Probe timed out after {:?} for {}", timeout, input_url);
            return CodecInfo::default();
        }
    };

    let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout));
    tracing::debug!(
        "Probed stream: video={}, audio={}, duration={:.1}s, copy_video={}, copy_audio={}",
        info.video_codec,
        info.audio_codec,
        info.duration,
        info.can_copy_video,
        info.can_copy_audio
    );
    info
}
