//! SDP session descriptions
//!
//! Parser and generator for the session descriptions RAVENNA exchanges
//! over RTSP (RFC 4566 syntax with the AES67/ST 2110-30 attribute set:
//! rtpmap, ptime, framecount, source-filter, ts-refclk, mediaclk,
//! clock-domain). The generator emits fields in canonical order so that
//! generate -> parse -> generate is byte-identical.

use std::fmt::Write as _;
use std::net::IpAddr;

use crate::audio::SampleFormat;
use crate::error::SdpError;

/// `o=` origin field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpOrigin {
    pub username: String,
    pub session_id: String,
    pub session_version: u64,
    pub address: IpAddr,
}

impl SdpOrigin {
    pub fn new(session_id: impl Into<String>, address: IpAddr) -> Self {
        Self {
            username: "-".into(),
            session_id: session_id.into(),
            session_version: 0,
            address,
        }
    }
}

/// `c=` connection data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdpConnection {
    pub address: IpAddr,
    /// Multicast TTL, carried as `<addr>/<ttl>`.
    pub ttl: Option<u8>,
}

/// `a=ts-refclk:ptp=...` reference clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpRefClock {
    /// PTP standard tag, e.g. "IEEE1588-2008".
    pub version: String,
    /// Grandmaster identity, formatted XX-XX-...-XX.
    pub grandmaster_identity: String,
    pub domain: u8,
}

impl SdpRefClock {
    pub fn ptp_2008(grandmaster_identity: impl Into<String>, domain: u8) -> Self {
        Self {
            version: "IEEE1588-2008".into(),
            grandmaster_identity: grandmaster_identity.into(),
            domain,
        }
    }
}

/// `a=mediaclk:direct=<offset>`. ST 2110-30 requires offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdpMediaClock {
    pub offset: u32,
}

/// Stream direction attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpDirection {
    RecvOnly,
    SendOnly,
    SendRecv,
}

/// `a=source-filter:` (RFC 4570), include mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpSourceFilter {
    pub include: bool,
    pub destination: IpAddr,
    pub sources: Vec<IpAddr>,
}

/// `a=rtpmap:` payload format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpRtpMap {
    pub payload_type: u8,
    /// Encoding name: L16 or L24.
    pub encoding: String,
    pub clock_rate: u32,
    pub channels: u16,
}

impl SdpRtpMap {
    pub fn sample_format(&self) -> Result<SampleFormat, SdpError> {
        match self.encoding.as_str() {
            "L16" => Ok(SampleFormat::I16),
            "L24" => Ok(SampleFormat::I24),
            other => Err(SdpError::new(format!("unsupported encoding {other}"))),
        }
    }
}

/// One `m=audio` block with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct SdpMediaDescription {
    pub port: u16,
    pub payload_type: u8,
    pub connection: Option<SdpConnection>,
    pub rtpmap: Option<SdpRtpMap>,
    /// Packet time in milliseconds.
    pub ptime: Option<f64>,
    pub framecount: Option<u32>,
    pub source_filter: Option<SdpSourceFilter>,
    pub sync_time: Option<u32>,
    pub clock_domain: Option<u8>,
    pub ref_clock: Option<SdpRefClock>,
    pub media_clock: Option<SdpMediaClock>,
    pub direction: Option<SdpDirection>,
}

impl SdpMediaDescription {
    pub fn new(port: u16, payload_type: u8) -> Self {
        Self {
            port,
            payload_type,
            connection: None,
            rtpmap: None,
            ptime: None,
            framecount: None,
            source_filter: None,
            sync_time: None,
            clock_domain: None,
            ref_clock: None,
            media_clock: None,
            direction: None,
        }
    }

    /// Packet time in seconds.
    pub fn ptime_seconds(&self) -> Option<f64> {
        self.ptime.map(|ms| ms / 1000.0)
    }
}

/// A complete session description.
#[derive(Debug, Clone, PartialEq)]
pub struct SdpSessionDescription {
    pub origin: SdpOrigin,
    pub session_name: String,
    pub connection: Option<SdpConnection>,
    pub clock_domain: Option<u8>,
    pub ref_clock: Option<SdpRefClock>,
    pub media_clock: Option<SdpMediaClock>,
    pub media: Vec<SdpMediaDescription>,
}

impl SdpSessionDescription {
    pub fn new(origin: SdpOrigin, session_name: impl Into<String>) -> Self {
        Self {
            origin,
            session_name: session_name.into(),
            connection: None,
            clock_domain: None,
            ref_clock: None,
            media_clock: None,
            media: Vec::new(),
        }
    }

    /// Serialises in canonical field order, CRLF line endings.
    pub fn to_sdp_string(&self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str("v=0\r\n");

        let _ = writeln_crlf(
            &mut out,
            &format!(
                "o={} {} {} IN IP4 {}",
                self.origin.username,
                self.origin.session_id,
                self.origin.session_version,
                self.origin.address
            ),
        );
        let _ = writeln_crlf(&mut out, &format!("s={}", self.session_name));
        if let Some(connection) = &self.connection {
            let _ = writeln_crlf(&mut out, &format_connection(connection));
        }
        out.push_str("t=0 0\r\n");

        if let Some(domain) = self.clock_domain {
            let _ = writeln_crlf(&mut out, &format!("a=clock-domain:PTPv2 {domain}"));
        }
        if let Some(ref_clock) = &self.ref_clock {
            let _ = writeln_crlf(&mut out, &format_ref_clock(ref_clock));
        }
        if let Some(media_clock) = &self.media_clock {
            let _ = writeln_crlf(&mut out, &format!("a=mediaclk:direct={}", media_clock.offset));
        }

        for media in &self.media {
            let _ = writeln_crlf(
                &mut out,
                &format!("m=audio {} RTP/AVP {}", media.port, media.payload_type),
            );
            if let Some(connection) = &media.connection {
                let _ = writeln_crlf(&mut out, &format_connection(connection));
            }
            if let Some(rtpmap) = &media.rtpmap {
                let _ = writeln_crlf(
                    &mut out,
                    &format!(
                        "a=rtpmap:{} {}/{}/{}",
                        rtpmap.payload_type, rtpmap.encoding, rtpmap.clock_rate, rtpmap.channels
                    ),
                );
            }
            if let Some(filter) = &media.source_filter {
                let mode = if filter.include { "incl" } else { "excl" };
                let mut line = format!("a=source-filter: {mode} IN IP4 {}", filter.destination);
                for source in &filter.sources {
                    let _ = write!(line, " {source}");
                }
                let _ = writeln_crlf(&mut out, &line);
            }
            if let Some(ptime) = media.ptime {
                let _ = writeln_crlf(&mut out, &format!("a=ptime:{}", format_decimal(ptime)));
            }
            if let Some(framecount) = media.framecount {
                let _ = writeln_crlf(&mut out, &format!("a=framecount:{framecount}"));
            }
            if let Some(sync_time) = media.sync_time {
                let _ = writeln_crlf(&mut out, &format!("a=sync-time:{sync_time}"));
            }
            if let Some(domain) = media.clock_domain {
                let _ = writeln_crlf(&mut out, &format!("a=clock-domain:PTPv2 {domain}"));
            }
            if let Some(ref_clock) = &media.ref_clock {
                let _ = writeln_crlf(&mut out, &format_ref_clock(ref_clock));
            }
            if let Some(media_clock) = &media.media_clock {
                let _ =
                    writeln_crlf(&mut out, &format!("a=mediaclk:direct={}", media_clock.offset));
            }
            if let Some(direction) = media.direction {
                let line = match direction {
                    SdpDirection::RecvOnly => "a=recvonly",
                    SdpDirection::SendOnly => "a=sendonly",
                    SdpDirection::SendRecv => "a=sendrecv",
                };
                let _ = writeln_crlf(&mut out, line);
            }
        }

        out
    }

    /// Line-oriented parser. Unknown mandatory field types are an error;
    /// unknown attributes are skipped.
    pub fn parse(input: &str) -> Result<Self, SdpError> {
        let mut lines = input
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty());

        let first = lines.next().ok_or_else(|| SdpError::new("empty input"))?;
        if first != "v=0" {
            return Err(SdpError::new(format!("unsupported version line: {first}")));
        }

        let mut origin: Option<SdpOrigin> = None;
        let mut session_name: Option<String> = None;
        let mut session = SdpSessionDescription::new(
            SdpOrigin::new("0", IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            "",
        );
        let mut current_media: Option<SdpMediaDescription> = None;

        for line in lines {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| SdpError::new(format!("malformed line: {line}")))?;

            match key {
                "o" => origin = Some(parse_origin(value)?),
                "s" => session_name = Some(value.to_string()),
                "c" => {
                    let connection = parse_connection(value)?;
                    match &mut current_media {
                        Some(media) => media.connection = Some(connection),
                        None => session.connection = Some(connection),
                    }
                }
                "t" => {} // timing: always "0 0" for streams
                "m" => {
                    if let Some(media) = current_media.take() {
                        session.media.push(media);
                    }
                    current_media = Some(parse_media_line(value)?);
                }
                "a" => parse_attribute(value, &mut session, &mut current_media)?,
                // Optional descriptive fields we carry no model for
                "i" | "u" | "e" | "p" | "b" | "z" | "k" | "r" => {}
                other => {
                    return Err(SdpError::new(format!("unknown mandatory field: {other}=")));
                }
            }
        }

        if let Some(media) = current_media.take() {
            session.media.push(media);
        }

        session.origin = origin.ok_or_else(|| SdpError::new("missing o= line"))?;
        session.session_name = session_name.ok_or_else(|| SdpError::new("missing s= line"))?;
        Ok(session)
    }
}

fn writeln_crlf(out: &mut String, line: &str) -> std::fmt::Result {
    out.push_str(line);
    out.push_str("\r\n");
    Ok(())
}

fn format_connection(connection: &SdpConnection) -> String {
    match connection.ttl {
        Some(ttl) => format!("c=IN IP4 {}/{}", connection.address, ttl),
        None => format!("c=IN IP4 {}", connection.address),
    }
}

fn format_ref_clock(ref_clock: &SdpRefClock) -> String {
    format!(
        "a=ts-refclk:ptp={}:{}:{}",
        ref_clock.version, ref_clock.grandmaster_identity, ref_clock.domain
    )
}

/// Formats without a trailing fractional part: 1.0 -> "1", 0.125 -> "0.125".
fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as u64)
    } else {
        format!("{value}")
    }
}

fn parse_origin(value: &str) -> Result<SdpOrigin, SdpError> {
    // o=<username> <sess-id> <sess-version> <nettype> <addrtype> <address>
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(SdpError::new(format!("malformed o= line: {value}")));
    }
    let address = parts[5]
        .parse()
        .map_err(|_| SdpError::new(format!("bad origin address: {}", parts[5])))?;
    Ok(SdpOrigin {
        username: parts[0].to_string(),
        session_id: parts[1].to_string(),
        session_version: parts[2]
            .parse()
            .map_err(|_| SdpError::new("bad session version"))?,
        address,
    })
}

fn parse_connection(value: &str) -> Result<SdpConnection, SdpError> {
    // c=IN IP4 <address>[/ttl]
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 || parts[0] != "IN" {
        return Err(SdpError::new(format!("malformed c= line: {value}")));
    }
    let (addr, ttl) = match parts[2].split_once('/') {
        Some((addr, ttl)) => (
            addr,
            Some(
                ttl.parse()
                    .map_err(|_| SdpError::new(format!("bad ttl: {ttl}")))?,
            ),
        ),
        None => (parts[2], None),
    };
    Ok(SdpConnection {
        address: addr
            .parse()
            .map_err(|_| SdpError::new(format!("bad connection address: {addr}")))?,
        ttl,
    })
}

fn parse_media_line(value: &str) -> Result<SdpMediaDescription, SdpError> {
    // m=audio <port> RTP/AVP <pt>
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(SdpError::new(format!("malformed m= line: {value}")));
    }
    if parts[0] != "audio" {
        return Err(SdpError::new(format!("unsupported media type: {}", parts[0])));
    }
    if parts[2] != "RTP/AVP" {
        return Err(SdpError::new(format!("unsupported protocol: {}", parts[2])));
    }
    let port = parts[1]
        .parse()
        .map_err(|_| SdpError::new(format!("bad media port: {}", parts[1])))?;
    let payload_type = parts[3]
        .parse()
        .map_err(|_| SdpError::new(format!("bad payload type: {}", parts[3])))?;
    Ok(SdpMediaDescription::new(port, payload_type))
}

fn parse_attribute(
    value: &str,
    session: &mut SdpSessionDescription,
    current_media: &mut Option<SdpMediaDescription>,
) -> Result<(), SdpError> {
    let (name, rest) = match value.split_once(':') {
        Some((name, rest)) => (name, rest),
        None => (value, ""),
    };

    match name {
        "rtpmap" => {
            // rtpmap:<pt> <encoding>/<rate>[/<channels>]
            let media = current_media
                .as_mut()
                .ok_or_else(|| SdpError::new("rtpmap outside media block"))?;
            let (pt, mapping) = rest
                .split_once(' ')
                .ok_or_else(|| SdpError::new(format!("malformed rtpmap: {rest}")))?;
            let fields: Vec<&str> = mapping.split('/').collect();
            if fields.len() < 2 {
                return Err(SdpError::new(format!("malformed rtpmap: {rest}")));
            }
            media.rtpmap = Some(SdpRtpMap {
                payload_type: pt.parse().map_err(|_| SdpError::new("bad rtpmap pt"))?,
                encoding: fields[0].to_string(),
                clock_rate: fields[1]
                    .parse()
                    .map_err(|_| SdpError::new("bad rtpmap rate"))?,
                channels: fields
                    .get(2)
                    .map(|ch| ch.parse().map_err(|_| SdpError::new("bad rtpmap channels")))
                    .transpose()?
                    .unwrap_or(1),
            });
        }
        "ptime" => {
            let media = current_media
                .as_mut()
                .ok_or_else(|| SdpError::new("ptime outside media block"))?;
            media.ptime = Some(
                rest.parse()
                    .map_err(|_| SdpError::new(format!("bad ptime: {rest}")))?,
            );
        }
        "framecount" => {
            if let Some(media) = current_media.as_mut() {
                media.framecount = Some(
                    rest.parse()
                        .map_err(|_| SdpError::new(format!("bad framecount: {rest}")))?,
                );
            }
        }
        "source-filter" => {
            let media = current_media
                .as_mut()
                .ok_or_else(|| SdpError::new("source-filter outside media block"))?;
            media.source_filter = Some(parse_source_filter(rest)?);
        }
        "ts-refclk" => {
            let ref_clock = parse_ref_clock(rest)?;
            match current_media.as_mut() {
                Some(media) => media.ref_clock = Some(ref_clock),
                None => session.ref_clock = Some(ref_clock),
            }
        }
        "mediaclk" => {
            let media_clock = parse_media_clock(rest)?;
            match current_media.as_mut() {
                Some(media) => media.media_clock = Some(media_clock),
                None => session.media_clock = Some(media_clock),
            }
        }
        "clock-domain" => {
            // clock-domain:PTPv2 <domain>
            let domain = rest
                .split_whitespace()
                .nth(1)
                .and_then(|d| d.parse().ok())
                .ok_or_else(|| SdpError::new(format!("bad clock-domain: {rest}")))?;
            match current_media.as_mut() {
                Some(media) => media.clock_domain = Some(domain),
                None => session.clock_domain = Some(domain),
            }
        }
        "sync-time" => {
            if let Some(media) = current_media.as_mut() {
                media.sync_time = rest.parse().ok();
            }
        }
        "recvonly" | "sendonly" | "sendrecv" => {
            if let Some(media) = current_media.as_mut() {
                media.direction = Some(match name {
                    "recvonly" => SdpDirection::RecvOnly,
                    "sendonly" => SdpDirection::SendOnly,
                    _ => SdpDirection::SendRecv,
                });
            }
        }
        _ => {} // unknown attributes are skipped
    }
    Ok(())
}

fn parse_source_filter(value: &str) -> Result<SdpSourceFilter, SdpError> {
    // source-filter: <incl|excl> IN IP4 <dest> <src> ...
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 5 || parts[1] != "IN" {
        return Err(SdpError::new(format!("malformed source-filter: {value}")));
    }
    let include = match parts[0] {
        "incl" => true,
        "excl" => false,
        other => return Err(SdpError::new(format!("bad filter mode: {other}"))),
    };
    let destination = parts[3]
        .parse()
        .map_err(|_| SdpError::new(format!("bad filter destination: {}", parts[3])))?;
    let sources = parts[4..]
        .iter()
        .map(|s| {
            s.parse()
                .map_err(|_| SdpError::new(format!("bad filter source: {s}")))
        })
        .collect::<Result<Vec<IpAddr>, SdpError>>()?;
    Ok(SdpSourceFilter {
        include,
        destination,
        sources,
    })
}

fn parse_ref_clock(value: &str) -> Result<SdpRefClock, SdpError> {
    // ts-refclk:ptp=IEEE1588-2008:<gmid>:<domain>
    let rest = value
        .strip_prefix("ptp=")
        .ok_or_else(|| SdpError::new(format!("unsupported refclk: {value}")))?;
    let fields: Vec<&str> = rest.split(':').collect();
    if fields.len() < 2 {
        return Err(SdpError::new(format!("malformed refclk: {value}")));
    }
    let domain = fields
        .get(2)
        .map(|d| d.parse().map_err(|_| SdpError::new("bad refclk domain")))
        .transpose()?
        .unwrap_or(0);
    Ok(SdpRefClock {
        version: fields[0].to_string(),
        grandmaster_identity: fields[1].to_string(),
        domain,
    })
}

fn parse_media_clock(value: &str) -> Result<SdpMediaClock, SdpError> {
    // mediaclk:direct=<offset>
    let offset = value
        .strip_prefix("direct=")
        .ok_or_else(|| SdpError::new(format!("unsupported mediaclk: {value}")))?
        .parse()
        .map_err(|_| SdpError::new(format!("bad mediaclk offset: {value}")))?;
    Ok(SdpMediaClock { offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_minimal_description() {
        let input = "v=0\r\no=- 1 0 IN IP4 10.0.0.1\r\ns=s\r\nc=IN IP4 239.1.2.3/15\r\nt=0 0\r\nm=audio 5004 RTP/AVP 96\r\na=rtpmap:96 L24/48000/2\r\na=ptime:1\r\n";

        let session = SdpSessionDescription::parse(input).unwrap();
        assert_eq!(session.session_name, "s");
        assert_eq!(
            session.connection.unwrap().address,
            IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3))
        );
        assert_eq!(session.connection.unwrap().ttl, Some(15));

        let media = &session.media[0];
        assert_eq!(media.port, 5004);
        assert_eq!(media.ptime, Some(1.0));
        let rtpmap = media.rtpmap.as_ref().unwrap();
        assert_eq!(rtpmap.channels, 2);
        assert_eq!(rtpmap.sample_format().unwrap(), SampleFormat::I24);
        assert_eq!(rtpmap.clock_rate, 48_000);
    }

    #[test]
    fn test_rejects_unknown_mandatory_field() {
        let input = "v=0\r\no=- 1 0 IN IP4 10.0.0.1\r\ns=s\r\nx=bogus\r\n";
        let error = SdpSessionDescription::parse(input).unwrap_err();
        assert!(error.0.contains("unknown mandatory field"));
    }

    #[test]
    fn test_rejects_missing_origin() {
        let input = "v=0\r\ns=s\r\n";
        assert!(SdpSessionDescription::parse(input).is_err());
    }

    fn ravenna_session() -> SdpSessionDescription {
        let destination = IpAddr::V4(Ipv4Addr::new(239, 69, 1, 1));
        let interface = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));

        let mut media = SdpMediaDescription::new(5004, 97);
        media.connection = Some(SdpConnection {
            address: destination,
            ttl: Some(15),
        });
        media.rtpmap = Some(SdpRtpMap {
            payload_type: 97,
            encoding: "L24".into(),
            clock_rate: 48_000,
            channels: 8,
        });
        media.ptime = Some(1.0);
        media.framecount = Some(48);
        media.source_filter = Some(SdpSourceFilter {
            include: true,
            destination,
            sources: vec![interface],
        });
        media.sync_time = Some(0);
        media.clock_domain = Some(0);
        media.ref_clock = Some(SdpRefClock::ptp_2008("00-1D-C1-FF-FE-12-34-56", 0));
        media.media_clock = Some(SdpMediaClock::default());
        media.direction = Some(SdpDirection::RecvOnly);

        let mut session =
            SdpSessionDescription::new(SdpOrigin::new("42", interface), "Studio A");
        session.connection = Some(SdpConnection {
            address: destination,
            ttl: Some(15),
        });
        session.clock_domain = Some(0);
        session.ref_clock = Some(SdpRefClock::ptp_2008("00-1D-C1-FF-FE-12-34-56", 0));
        session.media_clock = Some(SdpMediaClock::default());
        session.media.push(media);
        session
    }

    #[test]
    fn test_generate_parse_generate_is_identity() {
        let session = ravenna_session();
        let first = session.to_sdp_string();
        let parsed = SdpSessionDescription::parse(&first).unwrap();
        let second = parsed.to_sdp_string();
        assert_eq!(first, second);
        assert_eq!(parsed, session);
    }

    #[test]
    fn test_generated_attributes() {
        let sdp = ravenna_session().to_sdp_string();
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("m=audio 5004 RTP/AVP 97\r\n"));
        assert!(sdp.contains("a=rtpmap:97 L24/48000/8\r\n"));
        assert!(sdp.contains("a=ptime:1\r\n"));
        assert!(sdp.contains("a=framecount:48\r\n"));
        assert!(sdp.contains("a=source-filter: incl IN IP4 239.69.1.1 192.168.1.10\r\n"));
        assert!(sdp.contains("a=ts-refclk:ptp=IEEE1588-2008:00-1D-C1-FF-FE-12-34-56:0\r\n"));
        assert!(sdp.contains("a=mediaclk:direct=0\r\n"));
        assert!(sdp.contains("a=recvonly\r\n"));
    }

    #[test]
    fn test_fractional_ptime() {
        let mut session = ravenna_session();
        session.media[0].ptime = Some(0.125);
        let sdp = session.to_sdp_string();
        assert!(sdp.contains("a=ptime:0.125\r\n"));

        let parsed = SdpSessionDescription::parse(&sdp).unwrap();
        assert_eq!(parsed.media[0].ptime, Some(0.125));
        assert_eq!(parsed.media[0].ptime_seconds(), Some(0.000_125));
    }

    #[test]
    fn test_newline_only_input() {
        let input = "v=0\no=- 1 0 IN IP4 10.0.0.1\ns=test\nt=0 0\nm=audio 5004 RTP/AVP 97\na=rtpmap:97 L16/48000/2\n";
        let session = SdpSessionDescription::parse(input).unwrap();
        assert_eq!(session.session_name, "test");
        assert_eq!(
            session.media[0].rtpmap.as_ref().unwrap().sample_format().unwrap(),
            SampleFormat::I16
        );
    }
}
