//! Text rendering for the live packet display.
//!
//! Every function returns finished lines; the caller decides where they go.

use std::net::IpAddr;
use chrono::{DateTime, Local};
use hickory_proto::rr::RecordType;
use shared::protocol::{HEADER_LEN, IP_UDP_OVERHEAD, NORMAL_MAX_MESSAGE_DATA};
use crate::wire::{EdnsOption, Header, Question, RecordData, WireRecord};

/// Widest record line before rdata is cut off.
pub const MAX_WIDTH: usize = 132;

const SMALL_TRUNCATION_SLACK: usize = 192;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Per-packet framing tag shown in the header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTag {
    Query,
    LegacyQuery,
    Response,
}

impl PacketTag {
    fn as_str(self) -> &'static str {
        match self {
            PacketTag::Query => "-Q- ",
            PacketTag::LegacyQuery => "-LQ-",
            PacketTag::Response => "-R- ",
        }
    }
}

pub fn addr(src: &IpAddr) -> String {
    format!("{:<16}", src.to_string())
}

fn type_name(rtype: RecordType) -> String {
    match rtype {
        RecordType::Unknown(code) => format!("T{}", code),
        other => other.to_string(),
    }
}

/// Context needed to render the header of one packet.
pub struct HeaderInfo<'a> {
    pub timestamp: DateTime<Local>,
    pub interface: Option<u32>,
    pub interface_name: Option<&'a str>,
    pub source: IpAddr,
    /// Set when the packet was sent to a unicast address
    pub unicast_destination: Option<IpAddr>,
    pub tag: PacketTag,
    pub length: usize,
}

pub fn packet_header(info: &HeaderInfo<'_>, header: &Header) -> Vec<String> {
    let interface = match (info.interface, info.interface_name) {
        (Some(index), Some(name)) => format!("{}/{}", index, name),
        (Some(index), None) => index.to_string(),
        (None, _) => "any".to_string(),
    };

    let mut lines = vec![
        String::new(),
        format!("{} Interface {}", info.timestamp.format("%-H:%M:%S%.6f"), interface),
    ];

    let mut line = format!(
        "{} {}             Q:{:>3}  Ans:{:>3}  Auth:{:>3}  Add:{:>3}  Size:{:>5} bytes",
        addr(&info.source),
        info.tag.as_str(),
        header.questions,
        header.answers,
        header.authorities,
        header.additionals,
        info.length
    );
    if header.id != 0 {
        line.push_str(&format!("  ID:{}", header.id));
    }
    if let Some(dst) = info.unicast_destination {
        line.push_str(&format!("   To: {}", dst));
    }
    if header.truncated() {
        if header.is_response() {
            line.push_str("   Truncated");
        } else {
            line.push_str("   Truncated (KA list continues in next packet)");
        }
    }
    lines.push(line);

    if header.truncated() && info.length < HEADER_LEN + NORMAL_MAX_MESSAGE_DATA - SMALL_TRUNCATION_SLACK {
        let src = addr(&info.source);
        lines.push(format!(
            "{} **** WARNING: Packet suspiciously small. Payload size (excluding IP and UDP headers)",
            src
        ));
        lines.push(format!(
            "{} **** should usually be closer to {} bytes before truncation becomes necessary.",
            src,
            HEADER_LEN + NORMAL_MAX_MESSAGE_DATA
        ));
    }
    lines
}

/// `src (QM) PTR        _http._tcp.local.`
pub fn question(src: &IpAddr, tag: &str, question: &Question) -> String {
    format!(
        "{} {:<5} {:<5}      {}",
        addr(src),
        tag,
        type_name(question.qtype),
        question.name
    )
}

/// Questions have no place in a multicast response.
pub fn question_in_response(src: &IpAddr, question: &Question) -> String {
    format!(
        "{} (?)   **** ERROR: SHOULD NOT HAVE Q IN mDNS RESPONSE **** {:<5} {}",
        addr(src),
        type_name(question.qtype),
        question.name
    )
}

pub fn record(src: &IpAddr, tag: &str, record: &WireRecord) -> String {
    let mut line = format!(
        "{} {:<5} {:<5}{:>5} {} -> ",
        addr(src),
        tag,
        type_name(record.rtype),
        record.ttl,
        record.name
    );
    let room = MAX_WIDTH.saturating_sub(line.len());

    match &record.data {
        RecordData::Unreadable => line.push_str("**** ERROR: FAILED TO READ RDATA ****"),
        RecordData::A(ip) => line.push_str(&ip.to_string()),
        RecordData::Aaaa(ip) => line.push_str(&ip.to_string()),
        RecordData::Srv { target, port, .. } => line.push_str(&format!("{}:{}", target, port)),
        RecordData::Nsec { next, types } => {
            line.push_str(&next.to_string());
            for rtype in types {
                line.push(' ');
                line.push_str(&type_name(*rtype));
            }
        }
        RecordData::Name(name) => line.push_str(&clip(&name.to_string(), room)),
        RecordData::Text(strings) => line.push_str(&clip(&escape_strings(strings), room)),
        RecordData::Opt(options) => line.push_str(&clip(&describe_opt(record.rclass, options), room)),
        RecordData::Raw(bytes) => line.push_str(&clip(&escape_bytes(bytes), room)),
    }
    line
}

fn clip(text: &str, room: usize) -> String {
    text.chars().take(room).collect()
}

fn escape_into(out: &mut String, bytes: &[u8]) {
    for &b in bytes {
        if b == b'\\' {
            out.push('\\');
        }
        if b >= b' ' {
            out.push(b as char);
        } else {
            out.push_str("\\0x");
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    escape_into(&mut out, bytes);
    out
}

/// Character-strings separated by an escaped space; an empty string ends the list.
fn escape_strings(strings: &[Vec<u8>]) -> String {
    let mut out = String::new();
    let mut iter = strings.iter().take_while(|s| !s.is_empty()).peekable();
    while let Some(s) = iter.next() {
        escape_into(&mut out, s);
        if iter.peek().is_some() {
            out.push_str("\\ ");
        }
    }
    out
}

fn describe_opt(payload_size: u16, options: &[EdnsOption]) -> String {
    let mut out = format!("Max {}", payload_size);
    for option in options {
        match option.code {
            1 => out.push_str(&format!(" LLQ {} bytes", option.data.len())),
            2 if option.data.len() == 4 => {
                let lease = u32::from_be_bytes([option.data[0], option.data[1], option.data[2], option.data[3]]);
                out.push_str(&format!(" Lease {}", lease));
            }
            4 => {
                out.push_str(" Owner");
                for b in &option.data {
                    out.push_str(&format!("{:02X}", b));
                }
            }
            code => out.push_str(&format!(" Opt {} {} bytes", code, option.data.len())),
        }
    }
    out
}

/// Sixteen bytes per line: hex columns then printable characters.
pub fn hex_dump(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .map(|chunk| {
            let mut line = String::with_capacity(16 * 4);
            for i in 0..16 {
                match chunk.get(i) {
                    Some(b) => line.push_str(&format!("{:02X} ", b)),
                    None => line.push_str("   "),
                }
            }
            for &b in chunk {
                line.push(if b <= b' ' || b >= 126 { '.' } else { b as char });
            }
            line
        })
        .collect()
}

/// Decode failure diagnostic followed by a dump from the failing offset.
pub fn read_error(src: &IpAddr, what: &str, bytes: &[u8], offset: usize) -> Vec<String> {
    let mut lines = vec![format!("{} **** ERROR: FAILED TO READ {} ****", addr(src), what)];
    lines.extend(hex_dump(bytes.get(offset..).unwrap_or_default()));
    lines
}

pub fn error(src: &IpAddr, message: &str) -> String {
    format!("{} **** ERROR: {} ****", addr(src), message)
}

pub fn authority_in_response(src: &IpAddr, record: &WireRecord) -> String {
    format!(
        "{} (?)  **** ERROR: SHOULD NOT HAVE AUTHORITY IN mDNS RESPONSE **** {:<5} {}",
        addr(src),
        type_name(record.rtype),
        record.name
    )
}

pub fn oversized(src: &IpAddr, records: usize) -> Vec<String> {
    let src = addr(src);
    vec![
        format!("{} **** ERROR: Oversized packet with {} records.", src, records),
        format!(
            "{} **** Many network devices cannot receive packets larger than {} bytes.",
            src,
            IP_UDP_OVERHEAD + HEADER_LEN + NORMAL_MAX_MESSAGE_DATA
        ),
        format!(
            "{} **** To minimize interoperability failures, oversized packets MUST be limited to a single resource record.",
            src
        ),
    ]
}

pub fn unicast_query(src: &IpAddr) -> String {
    format!("Unicast query from {}", src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use chrono::TimeZone;
    use crate::wire::{read_record, testing::*};

    const SRC: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

    fn first_record(bytes: &[u8]) -> WireRecord {
        read_record(bytes, HEADER_LEN).unwrap().0
    }

    #[test]
    fn test_header_line_layout() {
        let bytes = PacketBuilder::query()
            .id(42)
            .question("_http._tcp.local.", TYPE_PTR, false)
            .build();
        let header = Header::parse(&bytes).unwrap();
        let info = HeaderInfo {
            timestamp: Local.with_ymd_and_hms(2024, 1, 1, 9, 5, 3).unwrap(),
            interface: Some(2),
            interface_name: Some("eth0"),
            source: SRC,
            unicast_destination: None,
            tag: PacketTag::Query,
            length: bytes.len(),
        };
        let lines = packet_header(&info, &header);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "9:05:03.000000 Interface 2/eth0");
        assert!(lines[2].starts_with("10.0.0.7         -Q-              Q:  1  Ans:  0"));
        assert!(lines[2].ends_with("  ID:42"));
    }

    #[test]
    fn test_small_truncated_packet_warns() {
        let bytes = PacketBuilder::query().flags([0x02, 0x00]).build();
        let header = Header::parse(&bytes).unwrap();
        let info = HeaderInfo {
            timestamp: Local::now(),
            interface: None,
            interface_name: None,
            source: SRC,
            unicast_destination: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            tag: PacketTag::Query,
            length: bytes.len(),
        };
        let lines = packet_header(&info, &header);
        assert!(lines[2].contains("To: 10.0.0.1"));
        assert!(lines[2].ends_with("Truncated (KA list continues in next packet)"));
        assert!(lines[3].contains("WARNING: Packet suspiciously small"));
        assert!(lines[4].contains("1452 bytes"));
    }

    #[test]
    fn test_record_line_escapes_text() {
        let bytes = PacketBuilder::response()
            .answer("web._http._tcp.local.", TYPE_TXT, 4500, &strings_rdata(&["path=/", "a\\b", "t\x01"]))
            .build();
        let line = record(&SRC, "(AN+)", &first_record(&bytes));
        assert_eq!(
            line,
            "10.0.0.7         (AN+) TXT   4500 web._http._tcp.local. -> path=/\\ a\\\\b\\ t\\0x01"
        );
    }

    #[test]
    fn test_record_line_respects_width() {
        let long = "x".repeat(200);
        let bytes = PacketBuilder::response()
            .answer("a.local.", TYPE_TXT, 120, &strings_rdata(&[&long]))
            .build();
        let line = record(&SRC, "(AN)", &first_record(&bytes));
        assert_eq!(line.len(), MAX_WIDTH);
    }

    #[test]
    fn test_unreadable_rdata_line() {
        let bytes = PacketBuilder::response().answer("a.local.", TYPE_A, 120, &[1, 2]).build();
        let line = record(&SRC, "(AN)", &first_record(&bytes));
        assert!(line.ends_with("-> **** ERROR: FAILED TO READ RDATA ****"));
    }

    #[test]
    fn test_hex_dump_layout() {
        let data: Vec<u8> = (0x41..0x41 + 18).collect();
        let lines = hex_dump(&data);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("41 42 43 "));
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert_eq!(lines[1], format!("51 52 {}QR", " ".repeat(14 * 3)));
    }

    #[test]
    fn test_oversized_message_cites_frame_limit() {
        let lines = oversized(&SRC, 3);
        assert!(lines[0].ends_with("Oversized packet with 3 records."));
        assert!(lines[1].contains("1500 bytes"));
    }
}
