//! Tuner (HDHomeRun) emulation
//!
//! Implements the discovery handshake DVR front-ends use to find network
//! tuners: a device descriptor with a stable id, a channel lineup, and a
//! static scan status. Lineup URLs point at `/stream/{channel_number}`.

use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::channel::ChannelInfo;

/// Tuner discovery response, PascalCase per the HDHomeRun protocol
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoverResponse {
    pub friendly_name: String,
    pub model_number: String,
    pub firmware_name: String,
    pub firmware_version: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub device_auth: String,
    #[serde(rename = "BaseURL")]
    pub base_url: String,
    #[serde(rename = "LineupURL")]
    pub lineup_url: String,
    pub tuner_count: u32,
}

/// One channel in the lineup
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct LineupEntry {
    pub guide_number: String,
    pub guide_name: String,
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct LineupStatusResponse {
    pub scan_in_progress: u8,
    pub scan_possible: u8,
    pub source: String,
    pub source_list: Vec<String>,
}

/// Stable device id derived from the hostname hash; persists across
/// restarts so DVRs do not re-pair.
pub fn generate_device_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "airwave".to_string());

    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    format!("AIRWAVE{:08X}", hasher.finish() as u32)
}

/// Local network IP for tuner URLs, falling back to loopback
pub fn get_local_ip() -> String {
    local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

pub fn generate_discover_response(
    friendly_name: &str,
    port: u16,
    max_sessions_per_channel: usize,
) -> DiscoverResponse {
    let local_ip = get_local_ip();
    let base_url = format!("http://{}:{}", local_ip, port);
    let lineup_url = format!("{}/lineup.json", base_url);

    // DVRs read this as concurrent stream capacity; physical tuners top out
    // around eight, and advertising more confuses some clients
    let tuner_count = max_sessions_per_channel.min(8).max(1) as u32;

    DiscoverResponse {
        friendly_name: friendly_name.to_string(),
        model_number: "HDHR5-4K".to_string(),
        firmware_name: "hdhomerun5_atsc".to_string(),
        firmware_version: "20200101".to_string(),
        device_id: generate_device_id(),
        device_auth: "airwave".to_string(),
        base_url,
        lineup_url,
        tuner_count,
    }
}

pub fn generate_lineup(channels: &[ChannelInfo], port: u16) -> Vec<LineupEntry> {
    let local_ip = get_local_ip();
    channels
        .iter()
        .map(|channel| LineupEntry {
            guide_number: channel.number.to_string(),
            guide_name: channel.name.clone(),
            url: format!("http://{}:{}/stream/{}", local_ip, port, channel.number),
        })
        .collect()
}

/// Static scan status: scanning is meaningless for virtual channels.
pub fn generate_lineup_status() -> LineupStatusResponse {
    LineupStatusResponse {
        scan_in_progress: 0,
        scan_possible: 0,
        source: "Cable".to_string(),
        source_list: vec!["Cable".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MediaRef;

    fn channel(number: i32, name: &str) -> ChannelInfo {
        ChannelInfo {
            id: number,
            number,
            name: name.to_string(),
            always_on: false,
            offline_image: None,
            filler: Vec::<MediaRef>::new(),
        }
    }

    // =========================================================================
    // Discover response
    // =========================================================================

    #[test]
    fn test_discover_response_serializes_pascal_case() {
        let response = generate_discover_response("Airwave", 5004, 4);
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"FriendlyName\":\"Airwave\""));
        assert!(json.contains("\"ModelNumber\":\"HDHR5-4K\""));
        assert!(json.contains("\"DeviceID\":\"AIRWAVE"));
        assert!(json.contains("\"BaseURL\":\"http://"));
        assert!(json.contains("\"TunerCount\":4"));
    }

    #[test]
    fn test_lineup_url_extends_base_url() {
        let response = generate_discover_response("Airwave", 5004, 4);
        assert!(response.lineup_url.starts_with(&response.base_url));
        assert!(response.lineup_url.ends_with("/lineup.json"));
    }

    #[test]
    fn test_tuner_count_is_bounded() {
        assert_eq!(generate_discover_response("A", 1, 50).tuner_count, 8);
        assert_eq!(generate_discover_response("A", 1, 0).tuner_count, 1);
        assert_eq!(generate_discover_response("A", 1, 3).tuner_count, 3);
    }

    // =========================================================================
    // Device id
    // =========================================================================

    #[test]
    fn test_device_id_is_stable_and_prefixed() {
        let a = generate_device_id();
        let b = generate_device_id();
        assert_eq!(a, b);
        assert!(a.starts_with("AIRWAVE"));
        // "AIRWAVE" + 8 hex chars
        assert_eq!(a.len(), 15);
    }

    // =========================================================================
    // Lineup
    // =========================================================================

    #[test]
    fn test_lineup_entries_reference_stream_urls() {
        let channels = vec![channel(1, "Retro Movies"), channel(5, "Cartoons")];
        let lineup = generate_lineup(&channels, 5004);

        assert_eq!(lineup.len(), 2);
        assert_eq!(lineup[0].guide_number, "1");
        assert_eq!(lineup[0].guide_name, "Retro Movies");
        assert!(lineup[0].url.ends_with(":5004/stream/1"));
        assert!(lineup[1].url.ends_with(":5004/stream/5"));
    }

    #[test]
    fn test_empty_lineup_serializes_to_empty_array() {
        let lineup = generate_lineup(&[], 5004);
        assert_eq!(serde_json::to_string(&lineup).unwrap(), "[]");
    }

    #[test]
    fn test_lineup_status_static_values() {
        let status = generate_lineup_status();
        assert_eq!(status.scan_in_progress, 0);
        assert_eq!(status.scan_possible, 0);
        assert_eq!(status.source, "Cable");
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"ScanInProgress\":0"));
        assert!(json.contains("\"SourceList\":[\"Cable\"]"));
    }
}
