//! XMLTV guide generation
//!
//! Renders the playout queue's rolling window as an XMLTV document for DVR
//! clients. Channels without scheduled items get two-hour placeholder
//! blocks so guides never show holes.

use chrono::{DateTime, Duration, Timelike, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::channel::ChannelInfo;
use crate::playout::{PlayoutItem, PlayoutQueue};

/// One programme entry in XMLTV form
#[derive(Debug, Clone)]
pub struct XmltvProgramme {
    pub channel_id: String,
    pub title: String,
    pub description: Option<String>,
    /// "YYYYMMDDHHmmss +0000"
    pub start: String,
    pub stop: String,
}

/// Format datetime to XMLTV format: "YYYYMMDDHHmmss +0000"
pub fn format_xmltv_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S +0000").to_string()
}

fn guide_channel_id(channel: &ChannelInfo) -> String {
    format!("airwave.{}", channel.number)
}

fn programme_from_item(channel: &ChannelInfo, item: &PlayoutItem) -> XmltvProgramme {
    let title = item
        .media
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| {
            if item.is_filler {
                format!("{} - Filler", channel.name)
            } else {
                channel.name.clone()
            }
        });

    XmltvProgramme {
        channel_id: guide_channel_id(channel),
        title,
        description: None,
        start: format_xmltv_datetime(item.scheduled_start),
        stop: format_xmltv_datetime(item.scheduled_end()),
    }
}

/// Two-hour placeholder blocks across the window for channels with no
/// scheduled items.
pub fn placeholder_programmes(channel: &ChannelInfo, days: i64) -> Vec<XmltvProgramme> {
    let now = Utc::now();
    let start_hour = now
        .with_minute(0)
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(now);

    let mut programmes = Vec::new();
    let mut current = start_hour;
    let end = start_hour + Duration::days(days);

    while current < end {
        let stop = current + Duration::hours(2);
        programmes.push(XmltvProgramme {
            channel_id: guide_channel_id(channel),
            title: format!("{} - Live Programming", channel.name),
            description: Some(format!("Continuous content on {}", channel.name)),
            start: format_xmltv_datetime(current),
            stop: format_xmltv_datetime(stop),
        });
        current = stop;
    }

    programmes
}

/// Generate the complete XMLTV guide for all channels.
pub fn generate_guide(
    channels: &[ChannelInfo],
    queue: &PlayoutQueue,
    days: i64,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let now = Utc::now();
    let window_end = now + Duration::days(days);

    let mut programmes: Vec<XmltvProgramme> = Vec::new();
    for channel in channels {
        let items = queue
            .window(channel.id, now - Duration::hours(1), window_end)
            .unwrap_or_default();
        if items.is_empty() {
            programmes.extend(placeholder_programmes(channel, days));
        } else {
            programmes.extend(items.iter().map(|item| programme_from_item(channel, item)));
        }
    }

    programmes.sort_by(|a, b| {
        a.channel_id
            .cmp(&b.channel_id)
            .then_with(|| a.start.cmp(&b.start))
    });

    format_xmltv_output(channels, &programmes)
}

/// Format channels and programmes as an XMLTV document.
pub fn format_xmltv_output(
    channels: &[ChannelInfo],
    programmes: &[XmltvProgramme],
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let estimated_size = 500 + (channels.len() * 300) + (programmes.len() * 300);
    let buffer = Vec::with_capacity(estimated_size);
    let mut writer = Writer::new(Cursor::new(buffer));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;
    writer.write_event(Event::DocType(BytesText::from_escaped("tv SYSTEM \"xmltv.dtd\"")))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;

    let mut tv = BytesStart::new("tv");
    tv.push_attribute(("generator-info-name", "Airwave"));
    writer.write_event(Event::Start(tv))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;

    for channel in channels {
        write_channel(&mut writer, channel)?;
    }
    for programme in programmes {
        write_programme(&mut writer, programme)?;
    }

    writer.write_event(Event::End(BytesEnd::new("tv")))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

fn write_channel<W: std::io::Write>(
    writer: &mut Writer<W>,
    channel: &ChannelInfo,
) -> Result<(), quick_xml::Error> {
    let id = guide_channel_id(channel);
    let mut ch = BytesStart::new("channel");
    ch.push_attribute(("id", id.as_str()));
    writer.write_event(Event::Start(ch))?;

    writer.write_event(Event::Start(BytesStart::new("display-name")))?;
    writer.write_event(Event::Text(BytesText::new(&channel.name)))?;
    writer.write_event(Event::End(BytesEnd::new("display-name")))?;

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;
    Ok(())
}

fn write_programme<W: std::io::Write>(
    writer: &mut Writer<W>,
    programme: &XmltvProgramme,
) -> Result<(), quick_xml::Error> {
    let mut prog = BytesStart::new("programme");
    prog.push_attribute(("start", programme.start.as_str()));
    prog.push_attribute(("stop", programme.stop.as_str()));
    prog.push_attribute(("channel", programme.channel_id.as_str()));
    writer.write_event(Event::Start(prog))?;

    let mut title = BytesStart::new("title");
    title.push_attribute(("lang", "en"));
    writer.write_event(Event::Start(title))?;
    writer.write_event(Event::Text(BytesText::new(&programme.title)))?;
    writer.write_event(Event::End(BytesEnd::new("title")))?;

    if let Some(ref desc) = programme.description {
        let mut desc_elem = BytesStart::new("desc");
        desc_elem.push_attribute(("lang", "en"));
        writer.write_event(Event::Start(desc_elem))?;
        writer.write_event(Event::Text(BytesText::new(desc)))?;
        writer.write_event(Event::End(BytesEnd::new("desc")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("programme")))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;
    Ok(())
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

    #[test]
    fn test_xmltv_datetime_format() {
        let dt = DateTime::parse_from_rfc3339("2025-06-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_xmltv_datetime(dt), "20250601123000 +0000");
    }

    #[test]
    fn test_placeholder_blocks_cover_window_in_two_hour_steps() {
        let programmes = placeholder_programmes(&channel(1, "Movies"), 1);
        assert_eq!(programmes.len(), 12);
        assert!(programmes[0].title.contains("Movies"));
        // Consecutive blocks tile with no gaps
        for pair in programmes.windows(2) {
            assert_eq!(pair[0].stop, pair[1].start);
        }
    }

    #[test]
    fn test_output_contains_channels_and_programmes() {
        let channels = vec![channel(1, "Retro & Classics")];
        let programmes = vec![XmltvProgramme {
            channel_id: "airwave.1".to_string(),
            title: "Night of the Living Dead".to_string(),
            description: None,
            start: "20250601000000 +0000".to_string(),
            stop: "20250601020000 +0000".to_string(),
        }];

        let xml = format_xmltv_output(&channels, &programmes).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<tv generator-info-name=\"Airwave\">"));
        assert!(xml.contains("<channel id=\"airwave.1\">"));
        // XML-escaping applies to text content
        assert!(xml.contains("Retro &amp; Classics"));
        assert!(xml.contains("programme start=\"20250601000000 +0000\""));
        assert!(xml.contains("Night of the Living Dead"));
        assert!(xml.ends_with("</tv>\n"));
    }

    #[test]
    fn test_empty_guide_is_still_valid() {
        let xml = format_xmltv_output(&[], &[]).unwrap();
        assert!(xml.contains("<tv generator-info-name=\"Airwave\">"));
        assert!(xml.contains("</tv>"));
    }
}
