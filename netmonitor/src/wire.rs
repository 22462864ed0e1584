//! DNS wire decoding for captured mDNS messages.
//!
//! Sections are walked one record at a time with an explicit cursor so the
//! classifier can stop at the first unreadable record and still report what
//! it decoded up to that point. Names (including compression pointers) are
//! decoded by `hickory-proto`; rdata is decoded only for the types the
//! monitor displays or inspects.

use std::net::{Ipv4Addr, Ipv6Addr};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};
use shared::protocol::{CLASS_ANY, HEADER_LEN, QCLASS_UNICAST_RESPONSE, RRCLASS_CACHE_FLUSH};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message is {0} bytes, shorter than a DNS header")]
    ShortHeader(usize),

    #[error("unreadable name at offset {0}")]
    BadName(usize),

    #[error("fixed fields truncated at offset {0}")]
    Truncated(usize),

    #[error("rdata of {length} bytes at offset {offset} overruns the message")]
    RdataOverrun { offset: usize, length: usize },

    #[error("failed to encode query: {0}")]
    Encode(String),
}

pub type WireResult<T> = Result<T, WireError>;

const QR_OPCODE_MASK: u8 = 0xF8;
const FLAG_QR_RESPONSE: u8 = 0x80;
const FLAG_TRUNCATED: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    StandardQuery,
    StandardResponse,
    /// Any other QR/opcode combination
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: [u8; 2],
    pub questions: u16,
    pub answers: u16,
    pub authorities: u16,
    pub additionals: u16,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> WireResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::ShortHeader(bytes.len()));
        }
        let word = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
        Ok(Header {
            id: word(0),
            flags: [bytes[2], bytes[3]],
            questions: word(4),
            answers: word(6),
            authorities: word(8),
            additionals: word(10),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self.flags[0] & QR_OPCODE_MASK {
            0 => MessageKind::StandardQuery,
            FLAG_QR_RESPONSE => MessageKind::StandardResponse,
            _ => MessageKind::Other,
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags[0] & FLAG_QR_RESPONSE != 0
    }

    pub fn truncated(&self) -> bool {
        self.flags[0] & FLAG_TRUNCATED != 0
    }

    /// Records outside the question section
    pub fn record_count(&self) -> usize {
        self.answers as usize + self.authorities as usize + self.additionals as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub qtype: RecordType,
    /// Class with the unicast-response bit removed
    pub qclass: u16,
    pub unicast_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// PTR, CNAME and NS targets
    Name(Name),
    Srv { priority: u16, weight: u16, port: u16, target: Name },
    /// TXT and HINFO character-strings
    Text(Vec<Vec<u8>>),
    Opt(Vec<EdnsOption>),
    Nsec { next: Name, types: Vec<RecordType> },
    Raw(Vec<u8>),
    /// The record framing was sound but its rdata did not decode
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub name: Name,
    pub rtype: RecordType,
    /// Raw class including the cache-flush bit
    pub rclass: u16,
    pub ttl: u32,
    pub rdlength: u16,
    pub data: RecordData,
    /// Offset of the type field, used to blank a record in place
    pub type_offset: usize,
}

impl WireRecord {
    pub fn class(&self) -> u16 {
        self.rclass & !RRCLASS_CACHE_FLUSH
    }

    pub fn is_unique(&self) -> bool {
        self.rclass & RRCLASS_CACHE_FLUSH != 0
    }

    /// True once `clear_type_and_class` has blanked this record
    pub fn is_cleared(&self) -> bool {
        u16::from(self.rtype) == 0 && self.rclass == 0
    }

    pub fn is_opt(&self) -> bool {
        self.rtype == RecordType::OPT
    }

    /// Whether this record is an answer to `question` (name, type and class).
    pub fn answers(&self, question: &Question) -> bool {
        if matches!(self.data, RecordData::Unreadable) {
            return false;
        }
        if self.rtype != question.qtype && question.qtype != RecordType::ANY {
            return false;
        }
        if self.class() != question.qclass && question.qclass != CLASS_ANY {
            return false;
        }
        self.name == question.name
    }
}

fn decoder_at(bytes: &[u8], offset: usize) -> WireResult<BinDecoder<'_>> {
    let mut decoder = BinDecoder::new(bytes);
    decoder
        .read_slice(offset)
        .map_err(|_| WireError::Truncated(offset))?;
    Ok(decoder)
}

fn read_u16(decoder: &mut BinDecoder<'_>) -> WireResult<u16> {
    let offset = decoder.index();
    decoder
        .read_u16()
        .map(|v| v.unverified())
        .map_err(|_| WireError::Truncated(offset))
}

fn read_u32(decoder: &mut BinDecoder<'_>) -> WireResult<u32> {
    let offset = decoder.index();
    decoder
        .read_u32()
        .map(|v| v.unverified())
        .map_err(|_| WireError::Truncated(offset))
}

fn read_name(decoder: &mut BinDecoder<'_>) -> WireResult<Name> {
    let offset = decoder.index();
    Name::read(decoder).map_err(|_| WireError::BadName(offset))
}

pub fn read_question(bytes: &[u8], cursor: usize) -> WireResult<(Question, usize)> {
    let mut decoder = decoder_at(bytes, cursor)?;
    let name = read_name(&mut decoder)?;
    let qtype = RecordType::from(read_u16(&mut decoder)?);
    let raw_class = read_u16(&mut decoder)?;

    let question = Question {
        name,
        qtype,
        qclass: raw_class & !QCLASS_UNICAST_RESPONSE,
        unicast_response: raw_class & QCLASS_UNICAST_RESPONSE != 0,
    };
    Ok((question, decoder.index()))
}

pub fn read_record(bytes: &[u8], cursor: usize) -> WireResult<(WireRecord, usize)> {
    let mut decoder = decoder_at(bytes, cursor)?;
    let name = read_name(&mut decoder)?;
    let type_offset = decoder.index();
    let rtype = RecordType::from(read_u16(&mut decoder)?);
    let rclass = read_u16(&mut decoder)?;
    let ttl = read_u32(&mut decoder)?;
    let rdlength = read_u16(&mut decoder)?;

    let start = decoder.index();
    let end = start + rdlength as usize;
    if end > bytes.len() {
        return Err(WireError::RdataOverrun { offset: start, length: rdlength as usize });
    }

    let record = WireRecord {
        name,
        rtype,
        rclass,
        ttl,
        rdlength,
        data: parse_rdata(bytes, rtype, start, end),
        type_offset,
    };
    Ok((record, end))
}

/// Cursor of the first answer record.
pub fn locate_answers(bytes: &[u8], header: &Header) -> WireResult<usize> {
    let mut cursor = HEADER_LEN;
    for _ in 0..header.questions {
        cursor = read_question(bytes, cursor)?.1;
    }
    Ok(cursor)
}

/// Cursor of the first authority record.
pub fn locate_authorities(bytes: &[u8], header: &Header) -> WireResult<usize> {
    let mut cursor = locate_answers(bytes, header)?;
    for _ in 0..header.answers {
        cursor = read_record(bytes, cursor)?.1;
    }
    Ok(cursor)
}

/// Blank the type and class of `record` so later walks skip it.
pub fn clear_type_and_class(bytes: &mut [u8], record: &WireRecord) {
    if let Some(fields) = bytes.get_mut(record.type_offset..record.type_offset + 4) {
        fields.fill(0);
    }
}

fn parse_rdata(bytes: &[u8], rtype: RecordType, start: usize, end: usize) -> RecordData {
    let rdata = &bytes[start..end];
    let parsed = match rtype {
        RecordType::A => <[u8; 4]>::try_from(rdata)
            .ok()
            .map(|octets| RecordData::A(Ipv4Addr::from(octets))),
        RecordType::AAAA => <[u8; 16]>::try_from(rdata)
            .ok()
            .map(|octets| RecordData::Aaaa(Ipv6Addr::from(octets))),
        RecordType::PTR | RecordType::CNAME | RecordType::NS => {
            name_within(bytes, start, end).map(|(name, _)| RecordData::Name(name))
        }
        RecordType::SRV => parse_srv(bytes, start, end),
        RecordType::TXT | RecordType::HINFO => parse_strings(rdata).map(RecordData::Text),
        RecordType::OPT => parse_options(rdata).map(RecordData::Opt),
        RecordType::NSEC => parse_nsec(bytes, start, end),
        _ => Some(RecordData::Raw(rdata.to_vec())),
    };
    parsed.unwrap_or(RecordData::Unreadable)
}

fn name_within(bytes: &[u8], start: usize, end: usize) -> Option<(Name, usize)> {
    let mut decoder = decoder_at(bytes, start).ok()?;
    let name = read_name(&mut decoder).ok()?;
    let next = decoder.index();
    (next <= end).then_some((name, next))
}

fn parse_srv(bytes: &[u8], start: usize, end: usize) -> Option<RecordData> {
    let mut decoder = decoder_at(bytes, start).ok()?;
    let priority = read_u16(&mut decoder).ok()?;
    let weight = read_u16(&mut decoder).ok()?;
    let port = read_u16(&mut decoder).ok()?;
    let (target, _) = name_within(bytes, decoder.index(), end)?;
    Some(RecordData::Srv { priority, weight, port, target })
}

fn parse_strings(rdata: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut strings = Vec::new();
    let mut rest = rdata;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len > tail.len() {
            return None;
        }
        strings.push(tail[..len].to_vec());
        rest = &tail[len..];
    }
    Some(strings)
}

fn parse_options(rdata: &[u8]) -> Option<Vec<EdnsOption>> {
    let mut options = Vec::new();
    let mut rest = rdata;
    while !rest.is_empty() {
        if rest.len() < 4 {
            return None;
        }
        let code = u16::from_be_bytes([rest[0], rest[1]]);
        let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
        let data = rest.get(4..4 + len)?;
        options.push(EdnsOption { code, data: data.to_vec() });
        rest = &rest[4 + len..];
    }
    Some(options)
}

/// A window covers 256 types, so its bitmap holds at most 32 bytes.
const NSEC_MAX_BITMAP_LEN: usize = 32;

fn parse_nsec(bytes: &[u8], start: usize, end: usize) -> Option<RecordData> {
    let (next, bitmap_start) = name_within(bytes, start, end)?;
    let mut types = Vec::new();
    let mut rest = &bytes[bitmap_start..end];
    while rest.len() >= 2 {
        let window = rest[0] as u16;
        let len = rest[1] as usize;
        if len > NSEC_MAX_BITMAP_LEN {
            return None;
        }
        let bitmap = rest.get(2..2 + len)?;
        for (i, byte) in bitmap.iter().enumerate() {
            for bit in 0..8u16 {
                if byte & (0x80 >> bit) != 0 {
                    types.push(RecordType::from(window * 256 + i as u16 * 8 + bit));
                }
            }
        }
        rest = &rest[2 + len..];
    }
    Some(RecordData::Nsec { next, types })
}

/// Encode a single-question query with the given transaction id.
pub fn build_query(id: u16, name: &Name, rtype: RecordType) -> WireResult<Vec<u8>> {
    let mut query = Query::new();
    query.set_name(name.clone());
    query.set_query_type(rtype);
    query.set_query_class(DNSClass::IN);

    let mut message = Message::new(id, MessageType::Query, OpCode::Query);
    message.add_query(query);

    let mut buf = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut buf);
    message
        .emit(&mut encoder)
        .map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_header_kinds() {
        let query = PacketBuilder::query().build();
        assert_eq!(Header::parse(&query).unwrap().kind(), MessageKind::StandardQuery);

        let response = PacketBuilder::response().build();
        assert_eq!(Header::parse(&response).unwrap().kind(), MessageKind::StandardResponse);

        // opcode UPDATE
        let update = PacketBuilder::query().flags([0x28, 0x00]).build();
        assert_eq!(Header::parse(&update).unwrap().kind(), MessageKind::Other);

        assert_eq!(Header::parse(&[0u8; 5]), Err(WireError::ShortHeader(5)));
    }

    #[test]
    fn test_question_unicast_bit() {
        let bytes = PacketBuilder::query()
            .question("_http._tcp.local.", TYPE_PTR, true)
            .build();
        let (question, next) = read_question(&bytes, HEADER_LEN).unwrap();
        assert_eq!(question.name, Name::from_ascii("_http._tcp.local.").unwrap());
        assert_eq!(question.qtype, RecordType::PTR);
        assert_eq!(question.qclass, 1);
        assert!(question.unicast_response);
        assert_eq!(next, bytes.len());
    }

    #[test]
    fn test_record_rdata_decoding() {
        let srv = {
            let mut rdata = vec![0, 0, 0, 0, 0x1f, 0x90];
            rdata.extend(encode_name("nas.local."));
            rdata
        };
        let bytes = PacketBuilder::response()
            .unique_answer("nas.local.", TYPE_A, 120, &[10, 0, 0, 7])
            .answer("web._http._tcp.local.", TYPE_SRV, 120, &srv)
            .answer("nas.local.", TYPE_HINFO, 120, &strings_rdata(&["ARM", "Linux"]))
            .build();
        let header = Header::parse(&bytes).unwrap();
        let cursor = locate_answers(&bytes, &header).unwrap();

        let (a, cursor) = read_record(&bytes, cursor).unwrap();
        assert_eq!(a.data, RecordData::A(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(a.is_unique());
        assert_eq!(a.class(), 1);

        let (srv, cursor) = read_record(&bytes, cursor).unwrap();
        match srv.data {
            RecordData::Srv { port, ref target, .. } => {
                assert_eq!(port, 8080);
                assert_eq!(target, &Name::from_ascii("nas.local.").unwrap());
            }
            other => panic!("unexpected rdata {:?}", other),
        }

        let (hinfo, cursor) = read_record(&bytes, cursor).unwrap();
        assert_eq!(hinfo.data, RecordData::Text(vec![b"ARM".to_vec(), b"Linux".to_vec()]));
        assert_eq!(cursor, bytes.len());
    }

    #[test]
    fn test_unreadable_rdata_is_not_fatal() {
        let bytes = PacketBuilder::response()
            .answer("nas.local.", TYPE_A, 120, &[10, 0, 0])
            .build();
        let (record, next) = read_record(&bytes, HEADER_LEN).unwrap();
        assert_eq!(record.data, RecordData::Unreadable);
        assert_eq!(next, bytes.len());
    }

    #[test]
    fn test_oversized_nsec_bitmap_is_unreadable() {
        let mut rdata = encode_name("a.local.");
        rdata.extend([255, 33]);
        rdata.extend([0xFF; 33]);
        let bytes = PacketBuilder::response()
            .answer("a.local.", TYPE_NSEC, 120, &rdata)
            .build();
        let (record, next) = read_record(&bytes, HEADER_LEN).unwrap();
        assert_eq!(record.data, RecordData::Unreadable);
        assert_eq!(next, bytes.len());

        // the largest legal bitmap in the last window still decodes
        let mut rdata = encode_name("a.local.");
        rdata.extend([255, 32]);
        rdata.extend([0xFF; 32]);
        let bytes = PacketBuilder::response()
            .answer("a.local.", TYPE_NSEC, 120, &rdata)
            .build();
        let (record, _) = read_record(&bytes, HEADER_LEN).unwrap();
        match record.data {
            RecordData::Nsec { types, .. } => {
                assert_eq!(types.len(), 256);
                assert_eq!(types.last().map(|t| u16::from(*t)), Some(u16::MAX));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_record_fails() {
        let bytes = PacketBuilder::response().broken_answer(&[3, b'f', b'o']).build();
        assert!(read_record(&bytes, HEADER_LEN).is_err());
    }

    #[test]
    fn test_rdata_overrun_fails() {
        let mut bytes = PacketBuilder::response()
            .answer("a.local.", TYPE_TXT, 120, &strings_rdata(&["x"]))
            .build();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            read_record(&bytes, HEADER_LEN),
            Err(WireError::RdataOverrun { .. })
        ));
    }

    #[test]
    fn test_clear_type_and_class() {
        let mut bytes = PacketBuilder::query()
            .authority("web._http._tcp.local.", TYPE_TXT, 120, &strings_rdata(&["a=b"]))
            .build();
        let (record, _) = read_record(&bytes, HEADER_LEN).unwrap();
        assert!(!record.is_cleared());

        clear_type_and_class(&mut bytes, &record);
        let (cleared, next) = read_record(&bytes, HEADER_LEN).unwrap();
        assert!(cleared.is_cleared());
        assert_eq!(cleared.ttl, 120);
        assert_eq!(next, bytes.len());
    }

    #[test]
    fn test_build_query_is_readable() {
        let name = Name::from_ascii("7.0.0.10.in-addr.arpa.").unwrap();
        let bytes = build_query(0xBEEF, &name, RecordType::PTR).unwrap();
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.id, 0xBEEF);
        assert_eq!(header.kind(), MessageKind::StandardQuery);
        assert_eq!(header.questions, 1);

        let (question, _) = read_question(&bytes, HEADER_LEN).unwrap();
        assert_eq!(question.name, name);
        assert_eq!(question.qtype, RecordType::PTR);
    }
}
