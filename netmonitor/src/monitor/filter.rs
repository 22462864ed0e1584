use std::net::IpAddr;
use shared::types::AddressFamily;

/// Whether per-host tracking runs for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTracking {
    Enabled,
    /// Exactly one address is being watched, so a host table adds nothing.
    Bypassed,
}

/// Decides which sources are in scope: an explicit allow-list of addresses,
/// or every source of the default family when the list is empty.
#[derive(Debug, Clone)]
pub struct AddressFilter {
    default_family: AddressFamily,
    addresses: Vec<IpAddr>,
    interface: Option<u32>,
}

impl AddressFilter {
    pub fn new(default_family: AddressFamily) -> Self {
        Self {
            default_family,
            addresses: Vec::new(),
            interface: None,
        }
    }

    /// Restrict to packets captured on one interface index.
    pub fn with_interface(mut self, interface: Option<u32>) -> Self {
        self.interface = interface;
        self
    }

    pub fn add(&mut self, addr: IpAddr) {
        if !self.addresses.contains(&addr) {
            self.addresses.push(addr);
        }
    }

    #[cfg(test)]
    pub fn clear(&mut self) {
        self.addresses.clear();
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn tracking(&self) -> HostTracking {
        if self.addresses.len() == 1 {
            HostTracking::Bypassed
        } else {
            HostTracking::Enabled
        }
    }

    pub fn matches(&self, source: &IpAddr, interface: Option<u32>) -> bool {
        if let (Some(wanted), Some(seen)) = (self.interface, interface) {
            if wanted != seen {
                return false;
            }
        }
        if self.addresses.is_empty() {
            AddressFamily::of(source) == self.default_family
        } else {
            self.addresses.contains(source)
        }
    }
}
