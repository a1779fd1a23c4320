//! Per-interface layer-3 address caches used in shared-MAC mode, where frames
//! from the wire carry the trunk's MAC and have to be switched by IP address.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const ADDR_CACHE_CAPACITY: usize = 32;

/// Bounded FIFO set: adding to a full cache evicts the oldest address.
#[derive(Debug, Clone)]
pub struct AddrCache<A> {
    addrs: VecDeque<A>,
    capacity: usize,
}

impl<A: Copy + PartialEq> AddrCache<A> {
    pub fn new(capacity: usize) -> Self {
        Self {
            addrs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, addr: &A) -> bool {
        self.addrs.contains(addr)
    }

    /// Returns false when the address was already cached.
    pub fn add(&mut self, addr: A) -> bool {
        if self.contains(&addr) {
            return false;
        }
        if self.addrs.len() >= self.capacity {
            self.addrs.pop_front();
        }
        self.addrs.push_back(addr);
        true
    }

    pub fn remove(&mut self, addr: &A) -> bool {
        match self.addrs.iter().position(|a| a == addr) {
            Some(i) => {
                self.addrs.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &A> {
        self.addrs.iter()
    }
}

/// The IPv4 and IPv6 caches of one interface (or of the network blacklist).
#[derive(Debug, Clone)]
pub struct AddrCaches {
    pub v4: AddrCache<Ipv4Addr>,
    pub v6: AddrCache<Ipv6Addr>,
}

impl Default for AddrCaches {
    fn default() -> Self {
        Self {
            v4: AddrCache::new(ADDR_CACHE_CAPACITY),
            v6: AddrCache::new(ADDR_CACHE_CAPACITY),
        }
    }
}

impl AddrCaches {
    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.v4.contains(&a),
            IpAddr::V6(a) => self.v6.contains(&a),
        }
    }

    pub fn add(&mut self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.v4.add(a),
            IpAddr::V6(a) => self.v6.add(a),
        }
    }

    pub fn remove(&mut self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.v4.remove(&a),
            IpAddr::V6(a) => self.v6.remove(&a),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A unicast IPv4 address an interface may legitimately own.
pub fn is_good_ipv4(addr: Ipv4Addr) -> bool {
    let o = addr.octets();
    !addr.is_broadcast() && o[0] != 0 && o[0] != 127 && !addr.is_multicast()
}

/// A unicast IPv6 address an interface may legitimately own.
pub fn is_good_ipv6(addr: Ipv6Addr) -> bool {
    !addr.is_unspecified() && !addr.is_multicast() && !addr.is_loopback()
}

pub fn is_good_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(a) => is_good_ipv4(a),
        IpAddr::V6(a) => is_good_ipv6(a),
    }
}
