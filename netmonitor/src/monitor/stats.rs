use hickory_proto::rr::{Name, RecordType};
use rustc_hash::FxHashMap;
use shared::types::{OpCounts, OpKind, ServiceType};
use crate::monitor::hosts::HostEntry;

const MAX_LABEL_LEN: usize = 63;

/// Operation totals for one service type.
#[derive(Debug, Clone)]
pub struct ActivityStat {
    service_type: ServiceType,
    ops: OpCounts,
    reported: bool,
}

impl ActivityStat {
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn ops(&self) -> &OpCounts {
        &self.ops
    }
}

fn valid_label(label: &[u8]) -> bool {
    (1..=MAX_LABEL_LEN).contains(&label.len())
}

fn service_label(label: &[u8]) -> bool {
    valid_label(label) && label[0] == b'_'
}

/// Pull the two underscore labels out of a name such as
/// `instance._http._tcp.local.`; at most one ordinary label may precede them.
pub fn extract_service_type<'a, I>(labels: I) -> Option<ServiceType>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut labels = labels.into_iter();
    let mut first = labels.next().filter(|l| valid_label(l))?;
    if first[0] != b'_' {
        first = labels.next()?;
    }
    let second = labels.next()?;
    if !service_label(first) || !service_label(second) {
        return None;
    }
    Some(ServiceType::from_labels(first, second))
}

/// Per-service-type activity, looked up by normalized key and kept in
/// first-seen order for reporting.
#[derive(Debug, Default)]
pub struct ServiceStats {
    entries: Vec<ActivityStat>,
    index: FxHashMap<ServiceType, usize>,
}

impl ServiceStats {
    /// Count one operation against the service type named by `name`, and
    /// against `host` when given. Returns whether anything was counted.
    ///
    /// Outside probes and goodbyes only PTR (browse) and SRV/TXT (resolve)
    /// records count; everything else is dropped.
    pub fn record(
        &mut self,
        host: Option<&mut HostEntry>,
        name: &Name,
        op: OpKind,
        rtype: RecordType,
    ) -> bool {
        let op = match op {
            OpKind::Probe | OpKind::Goodbye => op,
            _ if rtype == RecordType::SRV || rtype == RecordType::TXT => op.as_resolve(),
            _ if rtype == RecordType::PTR => op,
            _ => return false,
        };

        let Some(service_type) = extract_service_type(name.iter()) else {
            return false;
        };

        let i = match self.index.get(&service_type) {
            Some(&i) => i,
            None => {
                self.entries.push(ActivityStat {
                    service_type: service_type.clone(),
                    ops: OpCounts::default(),
                    reported: false,
                });
                self.index.insert(service_type, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };

        self.entries[i].ops.record(op);
        if let Some(host) = host {
            host.record_op(op);
        }
        true
    }

    #[cfg(test)]
    pub fn get(&self, service_type: &ServiceType) -> Option<&ActivityStat> {
        self.index.get(service_type).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Select up to `n` unreported entries by descending total, marking each
    /// one reported. Ties go to the entry seen first.
    pub fn take_top(&mut self, n: usize) -> Vec<ActivityStat> {
        let mut top = Vec::new();
        for _ in 0..n {
            let mut best: Option<usize> = None;
            for (i, stat) in self.entries.iter().enumerate() {
                if stat.reported || stat.ops.total() == 0 {
                    continue;
                }
                if best.map_or(true, |b| stat.ops.total() > self.entries[b].ops.total()) {
                    best = Some(i);
                }
            }
            let Some(i) = best else { break };
            self.entries[i].reported = true;
            top.push(self.entries[i].clone());
        }
        top
    }
}
