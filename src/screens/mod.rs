//! Error and slate screen generation
//!
//! Builds deterministic ffmpeg commands that synthesize MPEG-TS streams for
//! outage moments: technical-difficulty slates, off-air cards, buffering
//! fills between scheduled items, and test patterns. Output uses the same
//! muxrate settings as the main pipeline so a supervisor can switch between
//! content and screen output at packet boundaries.

use serde::Serialize;

use crate::transcoder::{spawn_transcoder, TranscodeError, TranscodeStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    /// Text message on a solid background
    Text,
    /// TV static noise
    Static,
    /// SMPTE color bars
    TestPattern,
    /// Solid black
    Black,
    /// Custom offline image
    CustomImage,
    /// Slate with channel info
    Slate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    Silent,
    /// 1 kHz test tone
    Sine,
    WhiteNoise,
    /// Periodic beep
    Beep,
    /// Looped hold-music file
    MusicHold,
}

#[derive(Debug, Clone)]
pub struct ScreenConfig {
    pub visual_mode: VisualMode,
    pub background_color: String,
    pub text_color: String,
    pub font_size: u32,
    pub custom_image_path: Option<String>,

    pub audio_mode: AudioMode,
    pub audio_volume: f64,
    pub hold_music_path: Option<String>,

    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,

    /// None streams until cancelled
    pub duration_secs: Option<f64>,

    pub ffmpeg_path: String,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            visual_mode: VisualMode::Text,
            background_color: "#1a1a2e".to_string(),
            text_color: "#ffffff".to_string(),
            font_size: 48,
            custom_image_path: None,
            audio_mode: AudioMode::Silent,
            audio_volume: 0.3,
            hold_music_path: None,
            width: 1920,
            height: 1080,
            framerate: 30,
            video_bitrate: "2M".to_string(),
            audio_bitrate: "128k".to_string(),
            duration_secs: None,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Message content rendered onto text and slate screens
#[derive(Debug, Clone)]
pub struct ScreenMessage {
    pub title: String,
    pub subtitle: String,
    pub channel_name: Option<String>,
    pub channel_number: Option<i32>,
    pub error_code: Option<String>,
    pub show_clock: bool,
}

impl Default for ScreenMessage {
    fn default() -> Self {
        Self {
            title: "Technical Difficulties".to_string(),
            subtitle: "We'll be right back".to_string(),
            channel_name: None,
            channel_number: None,
            error_code: None,
            show_clock: true,
        }
    }
}

impl ScreenMessage {
    pub fn off_air(channel_name: Option<String>, channel_number: Option<i32>) -> Self {
        Self {
            title: "Off Air".to_string(),
            subtitle: "This channel is currently offline".to_string(),
            channel_name,
            channel_number,
            error_code: None,
            show_clock: true,
        }
    }

    pub fn buffering(channel_name: Option<String>) -> Self {
        Self {
            title: "Loading...".to_string(),
            subtitle: "Please wait".to_string(),
            channel_name,
            channel_number: None,
            error_code: None,
            show_clock: true,
        }
    }
}

impl ScreenConfig {
    /// SMPTE color bars, optionally with the 1 kHz alignment tone.
    pub fn test_pattern(with_tone: bool) -> Self {
        Self {
            visual_mode: VisualMode::TestPattern,
            audio_mode: if with_tone { AudioMode::Sine } else { AudioMode::Silent },
            audio_volume: 0.2,
            ..Self::default()
        }
    }
}

/// Escape text for the drawtext filter
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
        .replace('%', "\\%")
}

fn video_source(cfg: &ScreenConfig) -> String {
    let (w, h, fps) = (cfg.width, cfg.height, cfg.framerate);
    match cfg.visual_mode {
        VisualMode::TestPattern => format!("smptebars=s={}x{}:r={}", w, h, fps),
        VisualMode::Static => format!(
            "nullsrc=s={}x{}:r={},geq=random(1)*255:128:128",
            w, h, fps
        ),
        VisualMode::Black => format!("color=c=black:s={}x{}:r={}", w, h, fps),
        VisualMode::Slate => format!("color=c=#2d2d2d:s={}x{}:r={}", w, h, fps),
        VisualMode::Text | VisualMode::CustomImage => {
            let bg = cfg.background_color.replace('#', "0x");
            format!("color=c={}:s={}x{}:r={}", bg, w, h, fps)
        }
    }
}

fn audio_source(cfg: &ScreenConfig) -> String {
    match cfg.audio_mode {
        AudioMode::Silent => "anullsrc=r=48000:cl=stereo".to_string(),
        AudioMode::Sine => format!("sine=f=1000:r=48000,volume={}", cfg.audio_volume),
        AudioMode::WhiteNoise => format!("anoisesrc=r=48000:a={}", cfg.audio_volume * 0.3),
        AudioMode::Beep => format!(
            "sine=f=800:r=48000,agate=threshold=0.5,volume={}",
            cfg.audio_volume
        ),
        AudioMode::MusicHold => "anullsrc=r=48000:cl=stereo".to_string(),
    }
}

/// The drawtext chain: title centered, subtitle below it, channel info top
/// left, local time bottom right, error code bottom left.
fn text_overlay(message: &ScreenMessage, cfg: &ScreenConfig) -> String {
    let mut filters = Vec::new();
    let color = &cfg.text_color;
    let size = cfg.font_size;

    let title = escape_drawtext(&message.title);
    filters.push(format!(
        "drawtext=text='{}':fontcolor={}:fontsize={}:x=(w-text_w)/2:y=(h-text_h)/2-{}",
        title, color, size, size
    ));

    if !message.subtitle.is_empty() {
        let subtitle = escape_drawtext(&message.subtitle);
        filters.push(format!(
            "drawtext=text='{}':fontcolor={}:fontsize={}:x=(w-text_w)/2:y=(h-text_h)/2+{}",
            subtitle,
            color,
            size / 2,
            size / 2
        ));
    }

    if let Some(channel_name) = &message.channel_name {
        let text = match message.channel_number {
            Some(number) => format!("Channel {}: {}", number, channel_name),
            None => channel_name.clone(),
        };
        filters.push(format!(
            "drawtext=text='{}':fontcolor={}:fontsize={}:x=40:y=40",
            escape_drawtext(&text),
            color,
            size / 3
        ));
    }

    if message.show_clock {
        filters.push(format!(
            "drawtext=text='%{{localtime\\:%H\\:%M\\:%S}}':fontcolor={}:fontsize={}:x=w-text_w-40:y=h-text_h-40",
            color,
            size / 3
        ));
    }

    if let Some(error_code) = &message.error_code {
        filters.push(format!(
            "drawtext=text='{}':fontcolor=#ff6b6b:fontsize={}:x=40:y=h-text_h-40",
            escape_drawtext(&format!("Error: {}", error_code)),
            size / 4
        ));
    }

    filters.join(",")
}

/// Build the ffmpeg argv for a screen stream. Pure: equal inputs produce
/// equal argv.
pub fn build_screen_command(message: &ScreenMessage, cfg: &ScreenConfig) -> Vec<String> {
    let mut cmd: Vec<String> = vec![cfg.ffmpeg_path.clone(), "-y".to_string()];
    cmd.push("-loglevel".to_string());
    cmd.push("warning".to_string());

    // Video input
    match (cfg.visual_mode, &cfg.custom_image_path) {
        (VisualMode::CustomImage, Some(image)) => {
            cmd.extend(["-loop", "1", "-i"].iter().map(|s| s.to_string()));
            cmd.push(image.clone());
        }
        _ => {
            cmd.push("-f".to_string());
            cmd.push("lavfi".to_string());
            cmd.push("-i".to_string());
            cmd.push(video_source(cfg));
        }
    }
    if let Some(duration) = cfg.duration_secs {
        cmd.push("-t".to_string());
        cmd.push(format!("{}", duration));
    }

    // Audio input
    match (cfg.audio_mode, &cfg.hold_music_path) {
        (AudioMode::MusicHold, Some(music)) => {
            cmd.extend(["-stream_loop", "-1", "-i"].iter().map(|s| s.to_string()));
            cmd.push(music.clone());
        }
        _ => {
            cmd.push("-f".to_string());
            cmd.push("lavfi".to_string());
            cmd.push("-i".to_string());
            cmd.push(audio_source(cfg));
        }
    }

    // Video encoding
    cmd.extend(
        ["-c:v", "libx264", "-preset", "ultrafast", "-tune", "stillimage"]
            .iter()
            .map(|s| s.to_string()),
    );
    cmd.push("-b:v".to_string());
    cmd.push(cfg.video_bitrate.clone());
    cmd.extend(["-pix_fmt", "yuv420p"].iter().map(|s| s.to_string()));
    cmd.push("-g".to_string());
    cmd.push((cfg.framerate * 2).to_string());

    // Text overlays apply on modes that can carry them
    if matches!(cfg.visual_mode, VisualMode::Text | VisualMode::Slate | VisualMode::Black) {
        let overlay = text_overlay(message, cfg);
        if !overlay.is_empty() {
            cmd.push("-vf".to_string());
            cmd.push(overlay);
        }
    }

    // Audio encoding
    if cfg.audio_mode == AudioMode::Silent {
        cmd.push("-an".to_string());
    } else {
        cmd.extend(["-c:a", "aac"].iter().map(|s| s.to_string()));
        cmd.push("-b:a".to_string());
        cmd.push(cfg.audio_bitrate.clone());
        cmd.extend(["-ar", "48000", "-ac", "2"].iter().map(|s| s.to_string()));
    }

    // Same mux settings as the content pipeline; switchover stays
    // packet-boundary compatible
    cmd.extend(
        [
            "-f",
            "mpegts",
            "-muxrate",
            "4M",
            "-pcr_period",
            "20",
            "-flush_packets",
            "1",
            "-",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    cmd
}

/// Spawn a screen stream. The returned stream behaves like any transcoder
/// stream: chunked MPEG-TS with guaranteed process teardown.
pub fn stream_screen(
    message: &ScreenMessage,
    cfg: &ScreenConfig,
    chunk_size: usize,
) -> Result<TranscodeStream, TranscodeError> {
    let cmd = build_screen_command(message, cfg);
    tracing::info!("Generating screen stream: {}", message.title);
    let (stream, _handle) = spawn_transcoder(&cmd, chunk_size)?;
    Ok(stream)
}
