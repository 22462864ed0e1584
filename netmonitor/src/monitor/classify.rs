use std::net::IpAddr;
use hickory_proto::rr::RecordType;
use shared::protocol::{HEADER_LEN, MDNS_PORT, NORMAL_MAX_MESSAGE_DATA};
use shared::types::{OpKind, Origin, PacketKind};
use crate::monitor::display::{self, HeaderInfo, PacketTag};
use crate::monitor::filter::HostTracking;
use crate::monitor::hosts::{HostEntry, HostRegistries};
use crate::monitor::resolve::analyse_host;
use crate::monitor::{InboundPacket, Monitor, Outcome};
use crate::wire::{
    clear_type_and_class, locate_answers, locate_authorities, read_question, read_record, Header,
    MessageKind, Question, WireRecord,
};

/// Attribute a packet to its source host, counting it unless it answers one
/// of our own queries. `None` when tracking is bypassed or the registry is full.
fn track(
    hosts: &mut HostRegistries,
    tracking: HostTracking,
    source: IpAddr,
    kind: PacketKind,
    origin: Origin,
) -> Option<&mut HostEntry> {
    if tracking == HostTracking::Bypassed {
        return None;
    }
    let entry = hosts.get_or_create(source)?;
    if origin.is_external() {
        entry.record_packet(kind);
    }
    Some(entry)
}

/// First not-yet-claimed authority record that answers `question`.
fn find_probe(bytes: &[u8], mut cursor: usize, count: u16, question: &Question) -> Option<WireRecord> {
    for _ in 0..count {
        let (record, next) = read_record(bytes, cursor).ok()?;
        if !record.is_cleared() && record.answers(question) {
            return Some(record);
        }
        cursor = next;
    }
    None
}

fn tag(unique: bool, unique_tag: &'static str, shared_tag: &'static str) -> &'static str {
    if unique {
        unique_tag
    } else {
        shared_tag
    }
}

impl Monitor {
    /// Classify one captured message: update counters and host state, render
    /// the display lines and collect any follow-up queries.
    ///
    /// Never fails; decode problems end up as diagnostic lines.
    pub fn classify(&mut self, packet: &mut InboundPacket) -> Outcome {
        let mut out = Outcome::default();
        let src = packet.source.ip();

        if !self.filter.matches(&src, packet.interface) {
            return out;
        }

        let header = match Header::parse(&packet.bytes) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!("Ignoring packet from {}: {}", src, e);
                return out;
            }
        };

        let multicast = packet.destination.is_multicast();
        match (multicast, header.kind()) {
            (false, MessageKind::StandardQuery) => out.lines.push(display::unicast_query(&src)),
            (false, MessageKind::StandardResponse) => self.unicast_response(packet, &header),
            (false, MessageKind::Other) => {}
            (true, MessageKind::StandardQuery) => self.query(packet, &header, &mut out),
            (true, MessageKind::StandardResponse) => self.response(packet, &header, &mut out),
            (true, MessageKind::Other) => {
                tracing::debug!(
                    "Unknown DNS packet type {:02X}{:02X} from {} (ignored)",
                    header.flags[0],
                    header.flags[1],
                    src
                );
                track(&mut self.hosts, self.filter.tracking(), src, PacketKind::Bad, packet.origin);
                self.totals.packets.record(PacketKind::Bad);
            }
        }
        out
    }

    fn header_lines(&self, packet: &InboundPacket, header: &Header, tag: PacketTag) -> Vec<String> {
        let info = HeaderInfo {
            timestamp: packet.timestamp,
            interface: packet.interface,
            interface_name: self.interface_name.as_deref(),
            source: packet.source.ip(),
            unicast_destination: (!packet.destination.is_multicast()).then_some(packet.destination),
            tag,
            length: packet.bytes.len(),
        };
        display::packet_header(&info, header)
    }

    /// Closing checks shared by queries and responses.
    fn finish_checks(src: &IpAddr, bytes: &[u8], header: &Header, opt_records: usize, out: &mut Outcome) {
        let records = header.record_count().saturating_sub(opt_records);
        if bytes.len() > HEADER_LEN + NORMAL_MAX_MESSAGE_DATA && records > 1 {
            out.lines.extend(display::oversized(src, records));
        }
        if opt_records > 1 {
            out.lines.push(display::error(src, "MULTIPLE OPT RECORDS"));
            out.lines.extend(display::hex_dump(&bytes[HEADER_LEN..]));
        }
    }

    fn query(&mut self, packet: &mut InboundPacket, header: &Header, out: &mut Outcome) {
        let src = packet.source.ip();
        let external = packet.origin.is_external();
        let legacy = packet.source.port() != MDNS_PORT;
        let (kind, packet_tag) = if legacy {
            (PacketKind::LegacyQuery, PacketTag::LegacyQuery)
        } else {
            (PacketKind::Query, PacketTag::Query)
        };

        out.lines.extend(self.header_lines(packet, header, packet_tag));
        let mut entry = track(&mut self.hosts, self.filter.tracking(), src, kind, packet.origin);
        if external {
            self.totals.packets.record(kind);
        }

        let authorities = locate_authorities(&packet.bytes, header).ok();
        let mut opt_records = 0;
        let mut cursor = HEADER_LEN;

        for _ in 0..header.questions {
            let (question, next) = match read_question(&packet.bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "QUESTION", &packet.bytes, cursor));
                    return;
                }
            };
            cursor = next;

            let probe = authorities
                .and_then(|start| find_probe(&packet.bytes, start, header.authorities, &question));
            match probe {
                Some(record) => {
                    self.totals.probes += 1;
                    let label = tag(question.unicast_response, "(PU)", "(PM)");
                    out.lines.push(display::record(&src, label, &record));
                    self.stats.record(entry.as_deref_mut(), &question.name, OpKind::Probe, question.qtype);
                    clear_type_and_class(&mut packet.bytes, &record);
                }
                None => {
                    let label = if legacy {
                        self.totals.legacy += 1;
                        "(LQ)"
                    } else {
                        self.totals.questions += 1;
                        tag(question.unicast_response, "(QU)", "(QM)")
                    };
                    out.lines.push(display::question(&src, label, &question));
                    if external {
                        self.stats.record(entry.as_deref_mut(), &question.name, OpKind::BrowseQuery, question.qtype);
                    }
                }
            }
        }

        for i in 0..header.answers {
            let (record, next) = match read_record(&packet.bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "KNOWN ANSWER", &packet.bytes, cursor));
                    return;
                }
            };
            cursor = next;
            out.lines.push(display::record(&src, "(KA)", &record));
            if record.is_opt() {
                opt_records += 1;
                out.lines.push(display::error(&src, "OPT RECORD IN ANSWER SECTION"));
            }
            // A continuation packet of a long known-answer list counts as one query
            if header.questions == 0 && i == 0 {
                self.stats.record(entry.as_deref_mut(), &record.name, OpKind::BrowseQuery, record.rtype);
            }
        }

        for _ in 0..header.authorities {
            let (record, next) = match read_record(&packet.bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "AUTHORITY", &packet.bytes, cursor));
                    return;
                }
            };
            cursor = next;
            if !record.is_cleared() {
                out.lines.push(display::record(&src, "(AU)", &record));
            }
            if record.is_opt() {
                opt_records += 1;
                out.lines.push(display::error(&src, "OPT RECORD IN AUTHORITY SECTION"));
            }
        }

        for _ in 0..header.additionals {
            let (record, next) = match read_record(&packet.bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "ADDITIONAL", &packet.bytes, cursor));
                    return;
                }
            };
            cursor = next;
            let label = if record.is_opt() {
                opt_records += 1;
                "(OP)"
            } else {
                "(AD)"
            };
            out.lines.push(display::record(&src, label, &record));
        }

        Self::finish_checks(&src, &packet.bytes, header, opt_records, out);

        if let Some(entry) = entry {
            if self.resolve_hosts {
                out.queries.extend(analyse_host(entry, packet.received_at, packet.interface));
            }
        }
    }

    fn response(&mut self, packet: &mut InboundPacket, header: &Header, out: &mut Outcome) {
        let src = packet.source.ip();
        let external = packet.origin.is_external();

        out.lines.extend(self.header_lines(packet, header, PacketTag::Response));
        let mut entry = track(&mut self.hosts, self.filter.tracking(), src, PacketKind::Response, packet.origin);
        if external {
            self.totals.packets.record(PacketKind::Response);
        }

        let bytes = &packet.bytes;
        let mut opt_records = 0;
        let mut cursor = HEADER_LEN;

        for _ in 0..header.questions {
            let (question, next) = match read_question(bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "QUESTION", bytes, cursor));
                    return;
                }
            };
            cursor = next;
            out.lines.push(display::question_in_response(&src, &question));
        }

        for _ in 0..header.answers {
            let (record, next) = match read_record(bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "ANSWER", bytes, cursor));
                    return;
                }
            };
            cursor = next;

            if record.ttl != 0 {
                self.totals.answers += 1;
                out.lines.push(display::record(&src, tag(record.is_unique(), "(AN)", "(AN+)"), &record));
                if external {
                    self.stats.record(entry.as_deref_mut(), &record.name, OpKind::BrowseAnswer, record.rtype);
                }
                if let Some(host) = entry.as_deref_mut() {
                    host.absorb(&record);
                }
            } else {
                self.totals.goodbyes += 1;
                out.lines.push(display::record(&src, "(DE)", &record));
                self.stats.record(entry.as_deref_mut(), &record.name, OpKind::Goodbye, record.rtype);
            }

            if record.is_opt() {
                opt_records += 1;
                out.lines.push(display::error(&src, "OPT RECORD IN ANSWER SECTION"));
            }
        }

        for _ in 0..header.authorities {
            let (record, next) = match read_record(bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "AUTHORITY", bytes, cursor));
                    return;
                }
            };
            cursor = next;
            out.lines.push(display::record(&src, "(AU)", &record));
            if record.is_opt() {
                opt_records += 1;
                out.lines.push(display::error(&src, "OPT RECORD IN AUTHORITY SECTION"));
            } else if record.rtype != RecordType::NSEC3 {
                out.lines.push(display::authority_in_response(&src, &record));
            }
        }

        for _ in 0..header.additionals {
            let (record, next) = match read_record(bytes, cursor) {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.lines.extend(display::read_error(&src, "ADDITIONAL", bytes, cursor));
                    return;
                }
            };
            cursor = next;
            self.totals.additionals += 1;
            let label = if record.is_opt() {
                opt_records += 1;
                "(OP)"
            } else {
                tag(record.is_unique(), "(AD)", "(AD+)")
            };
            out.lines.push(display::record(&src, label, &record));
            if let Some(host) = entry.as_deref_mut() {
                host.absorb(&record);
            }
        }

        Self::finish_checks(&src, bytes, header, opt_records, out);

        if let Some(entry) = entry {
            if self.resolve_hosts {
                out.queries.extend(analyse_host(entry, packet.received_at, packet.interface));
            }
        }
    }

    /// Replies sent straight to us: only mined for host details.
    fn unicast_response(&mut self, packet: &InboundPacket, header: &Header) {
        let src = packet.source.ip();
        let Some(entry) = track(&mut self.hosts, self.filter.tracking(), src, PacketKind::Response, packet.origin)
        else {
            return;
        };

        let Ok(mut cursor) = locate_answers(&packet.bytes, header) else {
            return;
        };
        for _ in 0..header.record_count() {
            let Ok((record, next)) = read_record(&packet.bytes, cursor) else {
                break;
            };
            cursor = next;
            if record.ttl != 0 {
                entry.absorb(&record);
            }
        }
    }
}
