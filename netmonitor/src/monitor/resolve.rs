use std::net::IpAddr;
use std::time::{Duration, Instant};
use hickory_proto::rr::{Name, RecordType};
use shared::types::AddressFamily;
use crate::monitor::hosts::HostEntry;

/// Queries sent to a host before it is given up on.
pub const MAX_QUERY_ATTEMPTS: u32 = 4;

/// Minimum gap between two queries to the same host.
pub const QUERY_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Attempts addressed to the host itself; later ones go to the group in
/// case another responder on the same machine answers instead.
pub const DIRECT_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Host(IpAddr),
    Group(AddressFamily),
}

/// A follow-up query for the transport to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundQuery {
    pub name: Name,
    pub rtype: RecordType,
    pub target: QueryTarget,
    /// Interface to send on; `None` lets the transport choose.
    pub interface: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    GaveUp,
    Throttled,
    /// Hostname and HINFO are both known
    Complete,
    /// Nothing to ask yet (no reverse name for the address)
    Idle,
    Ask { name: Name, rtype: RecordType },
}

/// Decide what, if anything, to ask `host` next.
pub fn next_step(host: &HostEntry, now: Instant) -> Step {
    if host.query_attempts() >= MAX_QUERY_ATTEMPTS {
        return Step::GaveUp;
    }

    if host.query_attempts() > 0 {
        if let Some(last) = host.last_query() {
            if now.saturating_duration_since(last) < QUERY_RETRY_INTERVAL {
                return Step::Throttled;
            }
        }
    }

    match (host.hostname(), host.hardware()) {
        (None, _) => match host.reverse_name() {
            Some(reverse) => Step::Ask { name: reverse.clone(), rtype: RecordType::PTR },
            None => Step::Idle,
        },
        (Some(hostname), None) => Step::Ask { name: hostname.clone(), rtype: RecordType::HINFO },
        (Some(_), Some(_)) => Step::Complete,
    }
}

/// Run the resolution state machine for `host`, recording the attempt when
/// a query is issued.
pub fn analyse_host(host: &mut HostEntry, now: Instant, interface: Option<u32>) -> Option<OutboundQuery> {
    let Step::Ask { name, rtype } = next_step(host, now) else {
        return None;
    };

    host.note_query_sent(now);

    let (target, interface) = if host.query_attempts() > DIRECT_ATTEMPTS {
        (QueryTarget::Group(AddressFamily::of(&host.address())), interface)
    } else {
        (QueryTarget::Host(host.address()), None)
    };

    tracing::debug!(
        "Asking {} for {} {} (attempt {})",
        host.address(),
        name,
        rtype,
        host.query_attempts()
    );

    Some(OutboundQuery { name, rtype, target, interface })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn host() -> HostEntry {
        HostEntry::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }

    #[test]
    fn test_first_query_is_reverse_lookup() {
        let mut host = host();
        let query = analyse_host(&mut host, Instant::now(), Some(2)).unwrap();
        assert_eq!(query.name.to_string(), "7.0.0.10.in-addr.arpa.");
        assert_eq!(query.rtype, RecordType::PTR);
        assert_eq!(query.target, QueryTarget::Host(host.address()));
        assert_eq!(query.interface, None);
        assert_eq!(host.query_attempts(), 1);
    }

    #[test]
    fn test_throttle_window() {
        let start = Instant::now();
        let mut host = host();
        assert!(analyse_host(&mut host, start, None).is_some());
        assert_eq!(host.query_attempts(), 1);

        assert_eq!(next_step(&host, start + Duration::from_millis(500)), Step::Throttled);
        assert!(analyse_host(&mut host, start + Duration::from_millis(500), None).is_none());
        assert_eq!(host.query_attempts(), 1);

        assert!(analyse_host(&mut host, start + Duration::from_millis(1500), None).is_some());
        assert_eq!(host.query_attempts(), 2);
        assert!(analyse_host(&mut host, start + Duration::from_millis(1600), None).is_none());
    }

    #[test]
    fn test_gives_up_after_four_attempts() {
        let start = Instant::now();
        let mut host = host();
        let mut sent = Vec::new();
        for i in 0..10u64 {
            if let Some(q) = analyse_host(&mut host, start + Duration::from_secs(2 * i), Some(5)) {
                sent.push(q);
            }
        }
        assert_eq!(sent.len(), MAX_QUERY_ATTEMPTS as usize);
        assert_eq!(next_step(&host, start + Duration::from_secs(3600)), Step::GaveUp);

        // third and fourth attempts go to the group on the capture interface
        assert_eq!(sent[1].target, QueryTarget::Host(host.address()));
        assert_eq!(sent[2].target, QueryTarget::Group(AddressFamily::Ipv4));
        assert_eq!(sent[3].interface, Some(5));
    }

    #[test]
    fn test_hinfo_after_hostname_then_complete() {
        let start = Instant::now();
        let mut host = host();
        host.learn_hostname(Name::from_ascii("nas.local.").unwrap());

        let query = analyse_host(&mut host, start, None).unwrap();
        assert_eq!(query.rtype, RecordType::HINFO);
        assert_eq!(query.name.to_string(), "nas.local.");

        let bytes = crate::wire::testing::PacketBuilder::response()
            .answer("nas.local.", crate::wire::testing::TYPE_HINFO, 120,
                &crate::wire::testing::strings_rdata(&["x86", "Linux"]))
            .build();
        let (hinfo, _) = crate::wire::read_record(&bytes, shared::protocol::HEADER_LEN).unwrap();
        host.absorb(&hinfo);
        assert_eq!(next_step(&host, start + Duration::from_secs(5)), Step::Complete);
    }
}
