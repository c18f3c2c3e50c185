// src/routing.rs
//! Routing table computed from the protocol state.
//!
//! The table is rebuilt from scratch whenever the link, neighbor, 2-hop,
//! topology, interface association or association sets change:
//! - symmetric neighbors at distance 1
//! - strict 2-hop neighbors at distance 2
//! - topology tuples, one hop further per round until nothing is added
//! - MID aliases of every reachable node
//! - HNA networks through their gateway
//!
//! Host entries are keyed by destination; the first route recorded for a
//! destination is kept, so shorter routes always win.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::message::Willingness;
use crate::repository::OlsrState;
use crate::time::Time;

/// One host route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingTableEntry {
    pub dest_addr: Ipv4Addr,
    pub next_addr: Ipv4Addr,
    /// Index of the local interface to send through.
    pub interface: u32,
    /// Hop count to the destination.
    pub distance: u32,
}

impl RoutingTableEntry {
    /// Return a short human-ish description string for debugging/logging.
    pub fn summary(&self) -> String {
        format!(
            "{} via {} iface={} hops={}",
            self.dest_addr, self.next_addr, self.interface, self.distance
        )
    }
}

/// A route to an HNA-announced network; `entry.dest_addr` is the network
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRoute {
    pub netmask: Ipv4Addr,
    pub entry: RoutingTableEntry,
}

impl NetworkRoute {
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).count_ones()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(addr) & mask == u32::from(self.entry.dest_addr) & mask
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} via {} iface={} hops={}",
            self.entry.dest_addr,
            self.prefix_len(),
            self.entry.next_addr,
            self.entry.interface,
            self.entry.distance
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    hosts: BTreeMap<Ipv4Addr, RoutingTableEntry>,
    networks: BTreeMap<(Ipv4Addr, Ipv4Addr), NetworkRoute>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable::default()
    }

    /// Host routes in ascending destination order.
    pub fn entries(&self) -> impl Iterator<Item = &RoutingTableEntry> {
        self.hosts.values()
    }

    pub fn network_routes(&self) -> impl Iterator<Item = &NetworkRoute> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.hosts.len() + self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.networks.is_empty()
    }

    /// The host route to `dest`, if any.
    pub fn entry(&self, dest: Ipv4Addr) -> Option<&RoutingTableEntry> {
        self.hosts.get(&dest)
    }

    /// Route for `dest`: the host route if present, otherwise the
    /// longest-prefix network route covering it.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&RoutingTableEntry> {
        if let Some(entry) = self.hosts.get(&dest) {
            return Some(entry);
        }
        self.networks
            .values()
            .filter(|r| r.contains(dest))
            .max_by_key(|r| r.prefix_len())
            .map(|r| &r.entry)
    }

    /// Record a host route unless `dest` already has one.
    ///
    /// Returns true if the route was added.
    fn add_entry(&mut self, entry: RoutingTableEntry) -> bool {
        if self.hosts.contains_key(&entry.dest_addr) {
            return false;
        }
        self.hosts.insert(entry.dest_addr, entry);
        true
    }

    /// Build the table from the repository.
    ///
    /// `ifaces` maps each local interface address to its interface index;
    /// its keys are also the addresses never routed to.
    pub fn compute(state: &OlsrState, ifaces: &BTreeMap<Ipv4Addr, u32>, now: Time) -> Self {
        let mut table = RoutingTable::new();
        let is_local = |addr: &Ipv4Addr| ifaces.contains_key(addr);
        let iface_index = |local: Ipv4Addr| ifaces.get(&local).copied().unwrap_or_default();

        // 1. Symmetric neighbors.
        let symmetric: BTreeMap<Ipv4Addr, Willingness> = state
            .neighbors()
            .filter(|n| n.is_symmetric())
            .map(|n| (n.neighbor_main_addr, n.willingness))
            .collect();
        for main_addr in symmetric.keys() {
            let mut first_link = None;
            for link in state.links() {
                if !link.is_valid(now) || state.main_address(link.neighbor_iface_addr) != *main_addr {
                    continue;
                }
                let entry = RoutingTableEntry {
                    dest_addr: link.neighbor_iface_addr,
                    next_addr: link.neighbor_iface_addr,
                    interface: iface_index(link.local_iface_addr),
                    distance: 1,
                };
                table.add_entry(entry);
                first_link.get_or_insert(entry);
            }
            if let Some(entry) = first_link {
                table.add_entry(RoutingTableEntry {
                    dest_addr: *main_addr,
                    ..entry
                });
            }
        }

        // 2. Strict 2-hop neighbors through willing symmetric neighbors.
        for t in state.two_hop_neighbors() {
            let dest = t.two_hop_neighbor_addr;
            if is_local(&dest) || symmetric.contains_key(&dest) {
                continue;
            }
            match symmetric.get(&t.neighbor_main_addr) {
                Some(w) if *w != Willingness::NEVER => {}
                _ => continue,
            }
            if let Some(via) = table.hosts.get(&t.neighbor_main_addr).copied() {
                table.add_entry(RoutingTableEntry {
                    dest_addr: dest,
                    distance: 2,
                    ..via
                });
            }
        }

        // 3. Topology tuples, extending reach one hop at a time.
        for h in 1u32.. {
            let mut added = false;
            for t in state.topology_set() {
                if is_local(&t.dest_addr) || table.hosts.contains_key(&t.dest_addr) {
                    continue;
                }
                let Some(via) = table.hosts.get(&t.last_addr).copied() else {
                    continue;
                };
                if via.distance != h {
                    continue;
                }
                added |= table.add_entry(RoutingTableEntry {
                    dest_addr: t.dest_addr,
                    distance: h + 1,
                    ..via
                });
            }
            if !added {
                break;
            }
        }

        // 4. Interface aliases.
        for t in state.iface_assoc_set() {
            if is_local(&t.iface_addr) {
                continue;
            }
            if let Some(via) = table.hosts.get(&t.main_addr).copied() {
                table.add_entry(RoutingTableEntry {
                    dest_addr: t.iface_addr,
                    ..via
                });
            }
        }

        // 5. Networks announced by other nodes.
        let local: BTreeSet<(Ipv4Addr, Ipv4Addr)> = state
            .associations()
            .iter()
            .map(|a| (a.network_addr, a.netmask))
            .collect();
        for t in state.association_set() {
            let key = (t.network_addr, t.netmask);
            if local.contains(&key) {
                continue;
            }
            let Some(via) = table.hosts.get(&t.gateway_addr).copied() else {
                continue;
            };
            let route = NetworkRoute {
                netmask: t.netmask,
                entry: RoutingTableEntry {
                    dest_addr: t.network_addr,
                    ..via
                },
            };
            let better = table
                .networks
                .get(&key)
                .is_none_or(|existing| existing.entry.distance > route.entry.distance);
            if better {
                table.networks.insert(key, route);
            }
        }

        table
    }
}
