//! Deterministic ffmpeg argv construction
//!
//! `build_transcode_command` is a pure function: equal inputs produce equal
//! argv. The argv layout is part of the streaming contract and is covered by
//! tests below.

use crate::resolver::SourceKind;
use crate::transcoder::probe::CodecInfo;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Options fixed at startup that shape command construction
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub ffmpeg_path: String,
    pub log_level: String,
    pub threads: u32,
    pub extra_flags: String,
    /// auto | none | videotoolbox | cuda | qsv | vaapi
    pub hardware_acceleration: String,
    /// Strip optional request headers (recovery strategy for stubborn 5xx)
    pub minimal_headers: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            log_level: "warning".to_string(),
            threads: 0,
            extra_flags: String::new(),
            hardware_acceleration: "auto".to_string(),
            minimal_headers: false,
        }
    }
}

impl TranscodeOptions {
    /// Resolve the hardware acceleration kind, or None for software only.
    ///
    /// "auto" picks VideoToolbox on macOS and nothing elsewhere; explicit
    /// names pass through.
    pub fn resolved_hwaccel(&self) -> Option<&str> {
        match self.hardware_acceleration.as_str() {
            "auto" => {
                if cfg!(target_os = "macos") {
                    Some("videotoolbox")
                } else {
                    None
                }
            }
            "none" | "" => None,
            other => Some(other),
        }
    }
}

/// Map a hardware acceleration kind to its H.264 encoder
pub fn hw_encoder_for(hwaccel: &str) -> &'static str {
    match hwaccel {
        "videotoolbox" => "h264_videotoolbox",
        "cuda" => "h264_nvenc",
        "qsv" => "h264_qsv",
        "vaapi" => "h264_vaapi",
        _ => "libx264",
    }
}

/// Clamp a seek offset against the probed duration.
///
/// Seeking at or past the end produces no output, so reset to 0; seeking into
/// the final ten seconds is clamped back to leave a playable tail.
pub fn clamp_seek_offset(seek_offset: f64, duration: f64) -> f64 {
    if seek_offset <= 0.0 || duration <= 0.0 {
        return seek_offset.max(0.0);
    }
    if seek_offset >= duration {
        tracing::warn!(
            "Seek offset {:.0}s >= duration {:.0}s - resetting to 0",
            seek_offset,
            duration
        );
        return 0.0;
    }
    let max_seek = (duration - 10.0).max(0.0);
    if seek_offset > max_seek {
        tracing::info!(
            "Clamping seek offset from {:.0}s to {:.0}s (duration: {:.0}s)",
            seek_offset,
            max_seek,
            duration
        );
        return max_seek;
    }
    seek_offset
}

fn is_youtube_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("youtube.com") || lower.contains("youtu.be") || lower.contains("googlevideo.com")
}

fn push_http_input_options(
    cmd: &mut Vec<String>,
    input_url: &str,
    source: SourceKind,
    minimal_headers: bool,
) {
    let is_youtube = source == SourceKind::YouTube || is_youtube_url(input_url);
    let is_archive = source == SourceKind::ArchiveOrg || input_url.to_lowercase().contains("archive.org");
    let is_plex = source == SourceKind::Plex || input_url.contains("/library/metadata/");

    // Per-source connect/read timeouts (microseconds) and reconnect pacing.
    // CDN URLs need generous windows; premature 30s timeouts used to kill
    // slow Archive.org edges mid-handshake.
    let (timeout, reconnect_delay) = if is_archive {
        ("60000000", "10")
    } else if is_plex {
        ("60000000", "3")
    } else if is_youtube {
        ("45000000", "5")
    } else {
        ("60000000", "5")
    };

    let mut args = vec!["-timeout".to_string(), timeout.to_string()];
    if !minimal_headers {
        args.push("-user_agent".to_string());
        args.push(DESKTOP_USER_AGENT.to_string());
    }
    args.extend_from_slice(&[
        "-reconnect".to_string(),
        "1".to_string(),
        "-reconnect_at_eof".to_string(),
        "1".to_string(),
        "-reconnect_streamed".to_string(),
        "1".to_string(),
        "-reconnect_delay_max".to_string(),
        reconnect_delay.to_string(),
        "-multiple_requests".to_string(),
        "1".to_string(),
    ]);

    if !minimal_headers {
        if is_archive {
            args.push("-headers".to_string());
            args.push("Referer: https://archive.org/\r\n".to_string());
        } else if is_youtube {
            args.push("-headers".to_string());
            args.push(format!(
                "Referer: https://www.youtube.com/\r\n\
                 User-Agent: {}\r\n\
                 Origin: https://www.youtube.com\r\n\
                 Accept: */*\r\n\
                 Accept-Language: en-US,en;q=0.9\r\n\
                 Accept-Encoding: identity\r\n",
                DESKTOP_USER_AGENT
            ));
        }
    }

    cmd.extend(args);
}

/// A/V sync flags chosen by encode mode.
///
/// Copy-both must preserve original timestamps; any transcoded leg needs
/// resynchronization against the other.
pub fn sync_flags(copy_video: bool, copy_audio: bool, hw_encode: bool) -> Vec<String> {
    let flags: &[&str] = if hw_encode {
        // aresample on the audio leg covers drift
        &["-vsync", "cfr"]
    } else if copy_video && copy_audio {
        &["-vsync", "passthrough", "-copyts", "-start_at_zero"]
    } else if copy_video {
        &["-async", "1", "-vsync", "passthrough"]
    } else if copy_audio {
        &["-async", "1", "-vsync", "cfr"]
    } else {
        &["-async", "1", "-vsync", "cfr"]
    };
    flags.iter().map(|s| s.to_string()).collect()
}

/// Build the ffmpeg argv for transcoding `input_url` to MPEG-TS on stdout.
///
/// Pure with respect to its arguments; the supervisor relies on rebuilding an
/// identical command across retries of the same attempt.
pub fn build_transcode_command(
    opts: &TranscodeOptions,
    input_url: &str,
    codec_info: &CodecInfo,
    source: SourceKind,
    seek_offset: f64,
) -> Vec<String> {
    let mut cmd: Vec<String> = vec![opts.ffmpeg_path.clone()];

    let can_copy_video = codec_info.can_copy_video;
    // Audio copy requires the video to be copied too; a transcoded video leg
    // gets a fresh AAC track to keep mux timing coherent.
    let can_copy_audio = codec_info.can_copy_audio && can_copy_video;
    let is_mpeg4 = codec_info.is_mpeg4();

    let chosen_hwaccel = opts.resolved_hwaccel();
    let use_hwaccel = chosen_hwaccel.is_some() && !can_copy_video && !is_mpeg4;

    cmd.push("-loglevel".to_string());
    cmd.push(opts.log_level.clone());

    // === Input options (before -i) ===

    if is_mpeg4 {
        cmd.push("-hwaccel".to_string());
        cmd.push("none".to_string());
    } else if use_hwaccel {
        // Hardware decode, but frames stay in system memory for the encoder
        cmd.push("-hwaccel".to_string());
        cmd.push(chosen_hwaccel.unwrap_or("none").to_string());
    }

    if input_url.starts_with("http") {
        push_http_input_options(&mut cmd, input_url, source, opts.minimal_headers);
    }

    let is_prerecorded = matches!(
        source,
        SourceKind::YouTube | SourceKind::ArchiveOrg | SourceKind::Local
    );
    let is_piped = input_url.starts_with("pipe:");

    if is_mpeg4 {
        // MPEG-4/AVI timing is unreliable; widen probes and ignore DTS
        cmd.extend(
            [
                "-fflags",
                "+genpts+discardcorrupt+igndts",
                "-err_detect",
                "ignore_err",
                "-flags",
                "+low_delay",
                "-strict",
                "experimental",
                "-probesize",
                "5000000",
                "-analyzeduration",
                "5000000",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    } else {
        cmd.extend(
            [
                "-fflags",
                "+genpts+discardcorrupt+fastseek",
                "-flags",
                "+low_delay",
                "-strict",
                "experimental",
                "-probesize",
                "1000000",
                "-analyzeduration",
                "2000000",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    }

    // Pre-recorded content must be read at realtime rate or clients drown
    if is_prerecorded && !is_piped {
        cmd.push("-re".to_string());
    }

    // Input seeking (-ss before -i) lands on the nearest keyframe without
    // decoding, keeping mid-program joins fast
    if seek_offset > 0.0 {
        cmd.push("-ss".to_string());
        cmd.push(format!("{}", seek_offset as u64));
    }

    cmd.push("-i".to_string());
    cmd.push(input_url.to_string());

    // === Output options (after -i) ===

    if opts.threads > 0 && !(can_copy_video && can_copy_audio) {
        cmd.push("-threads".to_string());
        cmd.push(opts.threads.to_string());
    }

    if can_copy_video {
        let bsf = if codec_info.is_hevc {
            "hevc_mp4toannexb,dump_extra"
        } else {
            "h264_mp4toannexb,dump_extra"
        };
        cmd.extend(["-c:v", "copy", "-bsf:v", bsf].iter().map(|s| s.to_string()));
    } else if use_hwaccel {
        let encoder = hw_encoder_for(chosen_hwaccel.unwrap_or(""));
        cmd.extend(
            [
                "-c:v",
                encoder,
                "-b:v",
                "6M",
                "-maxrate",
                "6M",
                "-bufsize",
                "12M",
                "-profile:v",
                "high",
                "-realtime",
                "1",
                "-allow_sw",
                "1",
                "-pix_fmt",
                "yuv420p",
                "-bsf:v",
                "dump_extra",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    } else {
        let preset = if is_mpeg4 { "ultrafast" } else { "veryfast" };
        cmd.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                preset,
                "-crf",
                "23",
                "-maxrate",
                "6M",
                "-bufsize",
                "12M",
                "-profile:v",
                "high",
                "-level",
                "4.1",
                "-pix_fmt",
                "yuv420p",
                "-g",
                "50",
                "-bsf:v",
                "dump_extra",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    }

    if can_copy_audio && !use_hwaccel {
        cmd.extend(["-c:a", "copy"].iter().map(|s| s.to_string()));
    } else if codec_info.can_copy_audio && use_hwaccel {
        // Hardware video encode drifts against copied audio; resample instead
        cmd.extend(
            [
                "-af",
                "aresample=async=1:min_hard_comp=0.100000:first_pts=0",
                "-c:a",
                "aac",
                "-b:a",
                "192k",
                "-ar",
                "48000",
                "-ac",
                "2",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    } else {
        cmd.extend(
            ["-c:a", "aac", "-b:a", "192k", "-ar", "48000", "-ac", "2"]
                .iter()
                .map(|s| s.to_string()),
        );
    }

    cmd.extend(sync_flags(can_copy_video, can_copy_audio, use_hwaccel));

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
            "-fflags",
            "+flush_packets",
            "-max_interleave_delta",
            "0",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    if !opts.extra_flags.trim().is_empty() {
        cmd.extend(opts.extra_flags.split_whitespace().map(|s| s.to_string()));
    }

    cmd.push("-".to_string());

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h264_aac_info() -> CodecInfo {
        CodecInfo {
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
            width: 1920,
            height: 1080,
            framerate: 29.97,
            duration: 600.0,
            can_copy_video: true,
            can_copy_audio: true,
            is_hevc: false,
        }
    }

    fn software_opts() -> TranscodeOptions {
        TranscodeOptions {
            hardware_acceleration: "none".to_string(),
            ..TranscodeOptions::default()
        }
    }

    fn find_value(cmd: &[String], flag: &str) -> Option<String> {
        cmd.iter()
            .position(|a| a == flag)
            .and_then(|i| cmd.get(i + 1).cloned())
    }

    // =========================================================================
    // Seek clamp tests
    // =========================================================================

    #[test]
    fn test_seek_past_duration_resets_to_zero() {
        assert_eq!(clamp_seek_offset(700.0, 600.0), 0.0);
        assert_eq!(clamp_seek_offset(600.0, 600.0), 0.0);
    }

    #[test]
    fn test_seek_near_end_clamped_to_ten_second_tail() {
        assert_eq!(clamp_seek_offset(595.0, 600.0), 590.0);
    }

    #[test]
    fn test_seek_within_bounds_unchanged() {
        assert_eq!(clamp_seek_offset(120.0, 600.0), 120.0);
    }

    #[test]
    fn test_seek_with_unknown_duration_passes_through() {
        assert_eq!(clamp_seek_offset(120.0, 0.0), 120.0);
    }

    // =========================================================================
    // Copy path tests
    // =========================================================================

    #[test]
    fn test_copy_both_uses_annexb_filter_and_passthrough_sync() {
        let cmd = build_transcode_command(
            &software_opts(),
            "/media/test.mkv",
            &h264_aac_info(),
            SourceKind::Local,
            0.0,
        );

        assert_eq!(find_value(&cmd, "-c:v").as_deref(), Some("copy"));
        assert_eq!(
            find_value(&cmd, "-bsf:v").as_deref(),
            Some("h264_mp4toannexb,dump_extra")
        );
        assert_eq!(find_value(&cmd, "-c:a").as_deref(), Some("copy"));
        assert_eq!(find_value(&cmd, "-vsync").as_deref(), Some("passthrough"));
        assert!(cmd.iter().any(|a| a == "-copyts"));
        assert!(cmd.iter().any(|a| a == "-start_at_zero"));
        assert!(cmd.iter().any(|a| a == "mpegts"));
        assert!(!cmd.iter().any(|a| a == "libx264"));
    }

    #[test]
    fn test_hevc_copy_uses_hevc_filter() {
        let mut info = h264_aac_info();
        info.video_codec = "hevc".to_string();
        info.is_hevc = true;

        let cmd = build_transcode_command(
            &software_opts(),
            "/media/test.mkv",
            &info,
            SourceKind::Local,
            0.0,
        );
        assert_eq!(
            find_value(&cmd, "-bsf:v").as_deref(),
            Some("hevc_mp4toannexb,dump_extra")
        );
    }

    #[test]
    fn test_audio_copy_requires_video_copy() {
        let mut info = h264_aac_info();
        info.can_copy_video = false;
        info.video_codec = "vp9".to_string();

        let cmd = build_transcode_command(
            &software_opts(),
            "/media/test.webm",
            &info,
            SourceKind::Local,
            0.0,
        );
        // Audio is TS-compatible but video is re-encoded, so audio transcodes
        assert_eq!(find_value(&cmd, "-c:a").as_deref(), Some("aac"));
        assert_eq!(find_value(&cmd, "-c:v").as_deref(), Some("libx264"));
        assert_eq!(find_value(&cmd, "-preset").as_deref(), Some("veryfast"));
    }

    // =========================================================================
    // Source-specific input option tests
    // =========================================================================

    #[test]
    fn test_local_file_gets_realtime_flag_and_no_http_options() {
        let cmd = build_transcode_command(
            &software_opts(),
            "/media/test.mkv",
            &h264_aac_info(),
            SourceKind::Local,
            0.0,
        );
        assert!(cmd.iter().any(|a| a == "-re"));
        assert!(!cmd.iter().any(|a| a == "-reconnect"));
    }

    #[test]
    fn test_youtube_cdn_gets_headers_and_45s_timeout() {
        let cmd = build_transcode_command(
            &software_opts(),
            "https://r4---sn.googlevideo.com/videoplayback?sig=abc",
            &h264_aac_info(),
            SourceKind::YouTube,
            0.0,
        );
        assert_eq!(find_value(&cmd, "-timeout").as_deref(), Some("45000000"));
        let headers = find_value(&cmd, "-headers").unwrap();
        assert!(headers.contains("Referer: https://www.youtube.com/"));
        assert!(headers.contains("Origin: https://www.youtube.com"));
        assert!(cmd.iter().any(|a| a == "-re"));
    }

    #[test]
    fn test_archive_gets_referer_and_60s_timeout() {
        let cmd = build_transcode_command(
            &software_opts(),
            "https://archive.org/download/item/file.mp4",
            &h264_aac_info(),
            SourceKind::ArchiveOrg,
            0.0,
        );
        assert_eq!(find_value(&cmd, "-timeout").as_deref(), Some("60000000"));
        assert_eq!(
            find_value(&cmd, "-headers").as_deref(),
            Some("Referer: https://archive.org/\r\n")
        );
        assert_eq!(find_value(&cmd, "-reconnect_delay_max").as_deref(), Some("10"));
    }

    #[test]
    fn test_minimal_headers_strips_optional_request_headers() {
        let opts = TranscodeOptions {
            hardware_acceleration: "none".to_string(),
            minimal_headers: true,
            ..TranscodeOptions::default()
        };
        let cmd = build_transcode_command(
            &opts,
            "https://archive.org/download/item/file.mp4",
            &h264_aac_info(),
            SourceKind::ArchiveOrg,
            0.0,
        );
        assert!(!cmd.iter().any(|a| a == "-headers"));
        assert!(!cmd.iter().any(|a| a == "-user_agent"));
        // Timeouts and reconnect behavior survive header stripping
        assert!(cmd.iter().any(|a| a == "-timeout"));
        assert!(cmd.iter().any(|a| a == "-reconnect"));
    }

    #[test]
    fn test_plex_stream_is_not_realtime_paced() {
        let cmd = build_transcode_command(
            &software_opts(),
            "http://plex.local:32400/library/parts/1/file.mkv?X-Plex-Token=t",
            &h264_aac_info(),
            SourceKind::Plex,
            0.0,
        );
        // Plex serves at its own pace; -re applies to youtube/archive/local
        assert!(!cmd.iter().any(|a| a == "-re"));
        assert_eq!(find_value(&cmd, "-reconnect_delay_max").as_deref(), Some("3"));
    }

    // =========================================================================
    // Seek placement tests
    // =========================================================================

    #[test]
    fn test_seek_is_input_side_and_integral() {
        let cmd = build_transcode_command(
            &software_opts(),
            "/media/test.mkv",
            &h264_aac_info(),
            SourceKind::Local,
            93.7,
        );
        let ss = cmd.iter().position(|a| a == "-ss").unwrap();
        let input = cmd.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input, "-ss must precede -i for fast keyframe seeking");
        assert_eq!(cmd[ss + 1], "93");
    }

    #[test]
    fn test_zero_seek_omits_ss() {
        let cmd = build_transcode_command(
            &software_opts(),
            "/media/test.mkv",
            &h264_aac_info(),
            SourceKind::Local,
            0.0,
        );
        assert!(!cmd.iter().any(|a| a == "-ss"));
    }

    // =========================================================================
    // Encoder selection tests
    // =========================================================================

    #[test]
    fn test_mpeg4_disables_hwaccel_and_uses_ultrafast() {
        let opts = TranscodeOptions {
            hardware_acceleration: "cuda".to_string(),
            ..TranscodeOptions::default()
        };
        let info = CodecInfo {
            video_codec: "mpeg4".to_string(),
            audio_codec: "mp3".to_string(),
            duration: 5400.0,
            ..CodecInfo::default()
        };

        let cmd = build_transcode_command(&opts, "/media/old.avi", &info, SourceKind::Local, 0.0);
        assert_eq!(find_value(&cmd, "-hwaccel").as_deref(), Some("none"));
        assert_eq!(find_value(&cmd, "-preset").as_deref(), Some("ultrafast"));
        assert_eq!(find_value(&cmd, "-fflags").as_deref(), Some("+genpts+discardcorrupt+igndts"));
        assert_eq!(find_value(&cmd, "-probesize").as_deref(), Some("5000000"));
    }

    #[test]
    fn test_hardware_encode_resamples_audio() {
        let opts = TranscodeOptions {
            hardware_acceleration: "cuda".to_string(),
            ..TranscodeOptions::default()
        };
        let info = CodecInfo {
            video_codec: "vp9".to_string(),
            audio_codec: "aac".to_string(),
            can_copy_audio: true,
            duration: 600.0,
            ..CodecInfo::default()
        };

        let cmd = build_transcode_command(&opts, "/media/a.webm", &info, SourceKind::Local, 0.0);
        assert_eq!(find_value(&cmd, "-c:v").as_deref(), Some("h264_nvenc"));
        assert!(find_value(&cmd, "-af").unwrap().starts_with("aresample=async=1"));
        assert_eq!(find_value(&cmd, "-c:a").as_deref(), Some("aac"));
        assert_eq!(find_value(&cmd, "-vsync").as_deref(), Some("cfr"));
        assert!(cmd.iter().any(|a| a == "-allow_sw"));
    }

    #[test]
    fn test_hw_encoder_map() {
        assert_eq!(hw_encoder_for("videotoolbox"), "h264_videotoolbox");
        assert_eq!(hw_encoder_for("cuda"), "h264_nvenc");
        assert_eq!(hw_encoder_for("qsv"), "h264_qsv");
        assert_eq!(hw_encoder_for("vaapi"), "h264_vaapi");
        assert_eq!(hw_encoder_for("unheard-of"), "libx264");
    }

    // =========================================================================
    // Determinism and muxer tests
    // =========================================================================

    #[test]
    fn test_command_is_deterministic() {
        let opts = software_opts();
        let info = h264_aac_info();
        let a = build_transcode_command(&opts, "/media/x.mkv", &info, SourceKind::Local, 42.0);
        let b = build_transcode_command(&opts, "/media/x.mkv", &info, SourceKind::Local, 42.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_muxer_flags_and_stdout_output() {
        let cmd = build_transcode_command(
            &software_opts(),
            "/media/test.mkv",
            &h264_aac_info(),
            SourceKind::Local,
            0.0,
        );
        assert_eq!(find_value(&cmd, "-f").as_deref(), Some("mpegts"));
        assert_eq!(find_value(&cmd, "-muxrate").as_deref(), Some("4M"));
        assert_eq!(find_value(&cmd, "-pcr_period").as_deref(), Some("20"));
        assert_eq!(find_value(&cmd, "-max_interleave_delta").as_deref(), Some("0"));
        assert_eq!(cmd.last().map(|s| s.as_str()), Some("-"));
    }

    #[test]
    fn test_extra_flags_appended_before_output() {
        let opts = TranscodeOptions {
            extra_flags: "-max_muxing_queue_size 9999".to_string(),
            hardware_acceleration: "none".to_string(),
            ..TranscodeOptions::default()
        };
        let cmd = build_transcode_command(
            &opts,
            "/media/test.mkv",
            &h264_aac_info(),
            SourceKind::Local,
            0.0,
        );
        let pos = cmd.iter().position(|a| a == "-max_muxing_queue_size").unwrap();
        assert_eq!(cmd[pos + 1], "9999");
        assert!(pos < cmd.len() - 1);
    }

    #[test]
    fn test_sync_flag_matrix() {
        assert_eq!(
            sync_flags(true, true, false),
            vec!["-vsync", "passthrough", "-copyts", "-start_at_zero"]
        );
        assert_eq!(sync_flags(true, false, false), vec!["-async", "1", "-vsync", "passthrough"]);
        assert_eq!(sync_flags(false, true, false), vec!["-async", "1", "-vsync", "cfr"]);
        assert_eq!(sync_flags(false, false, false), vec!["-async", "1", "-vsync", "cfr"]);
        assert_eq!(sync_flags(false, false, true), vec!["-vsync", "cfr"]);
    }
}
