//! Protocol state repository for one OLSR node.
//!
//! This module holds the information bases of RFC 3626 as keyed tuple sets:
//! - Link Set, Neighbor Set, 2-hop Neighbor Set, MPR Selector Set
//! - Topology Set, Duplicate Set, Interface Association Set
//! - Association Set (learned via HNA) and the local HNA associations
//!
//! Every set is a `BTreeMap` keyed by the tuple's uniqueness key, so inserting
//! an existing key replaces the old tuple and iteration is in ascending
//! address order. Nothing here mutates on its own: expiry happens only when
//! the owner calls [`OlsrState::expire`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::message::Willingness;
use crate::time::{Time, seq_newer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTuple {
    pub local_iface_addr: Ipv4Addr,
    pub neighbor_iface_addr: Ipv4Addr,
    /// The link is symmetric while `sym_time >= now`.
    pub sym_time: Time,
    /// The neighbor is heard while `asym_time >= now`.
    pub asym_time: Time,
    /// The tuple is kept while `time >= now`.
    pub time: Time,
}

impl LinkTuple {
    pub fn is_symmetric(&self, now: Time) -> bool {
        self.sym_time >= now
    }

    pub fn is_heard(&self, now: Time) -> bool {
        self.asym_time >= now
    }

    pub fn is_valid(&self, now: Time) -> bool {
        self.time >= now
    }

    fn key(&self) -> (Ipv4Addr, Ipv4Addr) {
        (self.local_iface_addr, self.neighbor_iface_addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborStatus {
    NotSym,
    Sym,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborTuple {
    pub neighbor_main_addr: Ipv4Addr,
    pub status: NeighborStatus,
    pub willingness: Willingness,
}

impl NeighborTuple {
    pub fn is_symmetric(&self) -> bool {
        self.status == NeighborStatus::Sym
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoHopNeighborTuple {
    pub neighbor_main_addr: Ipv4Addr,
    pub two_hop_neighbor_addr: Ipv4Addr,
    pub expiration_time: Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MprSelectorTuple {
    pub main_addr: Ipv4Addr,
    pub expiration_time: Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyTuple {
    pub dest_addr: Ipv4Addr,
    pub last_addr: Ipv4Addr,
    pub sequence_number: u16,
    pub expiration_time: Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTuple {
    pub address: Ipv4Addr,
    pub sequence_number: u16,
    pub retransmitted: bool,
    /// Local interfaces on which this message has been received.
    pub iface_list: Vec<Ipv4Addr>,
    pub expiration_time: Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceAssocTuple {
    pub iface_addr: Ipv4Addr,
    pub main_addr: Ipv4Addr,
    pub time: Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTuple {
    pub gateway_addr: Ipv4Addr,
    pub network_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub expiration_time: Time,
}

/// A network this node announces through HNA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Association {
    pub network_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// What one expiry sweep removed.
#[derive(Debug, Default)]
pub struct Expired {
    pub links: Vec<LinkTuple>,
    pub two_hop_neighbors: usize,
    pub mpr_selectors: usize,
    pub topology: usize,
    pub duplicates: usize,
    pub iface_assoc: usize,
    pub associations: usize,
}

impl Expired {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
            && self.two_hop_neighbors == 0
            && self.mpr_selectors == 0
            && self.topology == 0
            && self.duplicates == 0
            && self.iface_assoc == 0
            && self.associations == 0
    }

    /// Whether anything that feeds route computation went away.
    pub fn affects_routes(&self) -> bool {
        !self.links.is_empty()
            || self.two_hop_neighbors > 0
            || self.topology > 0
            || self.iface_assoc > 0
            || self.associations > 0
    }
}

#[derive(Debug, Default, Clone)]
pub struct OlsrState {
    links: BTreeMap<(Ipv4Addr, Ipv4Addr), LinkTuple>,
    neighbors: BTreeMap<Ipv4Addr, NeighborTuple>,
    two_hop_neighbors: BTreeMap<(Ipv4Addr, Ipv4Addr), TwoHopNeighborTuple>,
    mpr_set: BTreeSet<Ipv4Addr>,
    mpr_selectors: BTreeMap<Ipv4Addr, MprSelectorTuple>,
    topology: BTreeMap<(Ipv4Addr, Ipv4Addr), TopologyTuple>,
    duplicates: BTreeMap<(Ipv4Addr, u16), DuplicateTuple>,
    iface_assoc: BTreeMap<Ipv4Addr, IfaceAssocTuple>,
    associations: BTreeMap<(Ipv4Addr, Ipv4Addr, Ipv4Addr), AssociationTuple>,
    local_associations: BTreeSet<Association>,
}

impl OlsrState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Link Set ---

    pub fn links(&self) -> impl Iterator<Item = &LinkTuple> {
        self.links.values()
    }

    pub fn find_link_tuple(&self, local: Ipv4Addr, neighbor: Ipv4Addr) -> Option<&LinkTuple> {
        self.links.get(&(local, neighbor))
    }

    pub fn find_link_tuple_mut(
        &mut self,
        local: Ipv4Addr,
        neighbor: Ipv4Addr,
    ) -> Option<&mut LinkTuple> {
        self.links.get_mut(&(local, neighbor))
    }

    /// A symmetric link to `neighbor_iface` on any local interface.
    pub fn find_sym_link_tuple(&self, neighbor_iface: Ipv4Addr, now: Time) -> Option<&LinkTuple> {
        self.links
            .values()
            .find(|l| l.neighbor_iface_addr == neighbor_iface && l.is_symmetric(now))
    }

    pub fn insert_link_tuple(&mut self, tuple: LinkTuple) -> &mut LinkTuple {
        match self.links.entry(tuple.key()) {
            Entry::Occupied(mut e) => {
                e.insert(tuple);
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(tuple),
        }
    }

    /// The link `(local, neighbor)`, created from `make` if absent. The flag
    /// is true when the tuple was created.
    pub fn find_or_insert_link_tuple(
        &mut self,
        local: Ipv4Addr,
        neighbor: Ipv4Addr,
        make: impl FnOnce() -> LinkTuple,
    ) -> (&mut LinkTuple, bool) {
        match self.links.entry((local, neighbor)) {
            Entry::Occupied(e) => (e.into_mut(), false),
            Entry::Vacant(e) => (e.insert(make()), true),
        }
    }

    pub fn erase_link_tuple(&mut self, local: Ipv4Addr, neighbor: Ipv4Addr) -> Option<LinkTuple> {
        self.links.remove(&(local, neighbor))
    }

    /// Remove every link whose local end is `local`.
    pub fn erase_link_tuples_on(&mut self, local: Ipv4Addr) -> Vec<LinkTuple> {
        let keys: Vec<_> = self
            .links
            .keys()
            .filter(|(l, _)| *l == local)
            .copied()
            .collect();
        keys.iter().filter_map(|k| self.links.remove(k)).collect()
    }

    // --- Neighbor Set ---

    pub fn neighbors(&self) -> impl Iterator<Item = &NeighborTuple> {
        self.neighbors.values()
    }

    pub fn find_neighbor_tuple(&self, main_addr: Ipv4Addr) -> Option<&NeighborTuple> {
        self.neighbors.get(&main_addr)
    }

    pub fn find_neighbor_tuple_mut(&mut self, main_addr: Ipv4Addr) -> Option<&mut NeighborTuple> {
        self.neighbors.get_mut(&main_addr)
    }

    pub fn find_sym_neighbor_tuple(&self, main_addr: Ipv4Addr) -> Option<&NeighborTuple> {
        self.neighbors
            .get(&main_addr)
            .filter(|n| n.is_symmetric())
    }

    pub fn insert_neighbor_tuple(&mut self, tuple: NeighborTuple) {
        self.neighbors.insert(tuple.neighbor_main_addr, tuple);
    }

    pub fn erase_neighbor_tuple(&mut self, main_addr: Ipv4Addr) -> Option<NeighborTuple> {
        self.neighbors.remove(&main_addr)
    }

    // --- 2-hop Neighbor Set ---

    pub fn two_hop_neighbors(&self) -> impl Iterator<Item = &TwoHopNeighborTuple> {
        self.two_hop_neighbors.values()
    }

    pub fn find_two_hop_neighbor_tuple(
        &self,
        neighbor: Ipv4Addr,
        two_hop: Ipv4Addr,
    ) -> Option<&TwoHopNeighborTuple> {
        self.two_hop_neighbors.get(&(neighbor, two_hop))
    }

    pub fn find_two_hop_neighbor_tuple_mut(
        &mut self,
        neighbor: Ipv4Addr,
        two_hop: Ipv4Addr,
    ) -> Option<&mut TwoHopNeighborTuple> {
        self.two_hop_neighbors.get_mut(&(neighbor, two_hop))
    }

    pub fn insert_two_hop_neighbor_tuple(&mut self, tuple: TwoHopNeighborTuple) {
        self.two_hop_neighbors
            .insert((tuple.neighbor_main_addr, tuple.two_hop_neighbor_addr), tuple);
    }

    pub fn erase_two_hop_neighbor_tuple(
        &mut self,
        neighbor: Ipv4Addr,
        two_hop: Ipv4Addr,
    ) -> Option<TwoHopNeighborTuple> {
        self.two_hop_neighbors.remove(&(neighbor, two_hop))
    }

    /// Remove all 2-hop tuples reached through `neighbor`. Returns how many.
    pub fn erase_two_hop_neighbor_tuples(&mut self, neighbor: Ipv4Addr) -> usize {
        let before = self.two_hop_neighbors.len();
        self.two_hop_neighbors.retain(|(n, _), _| *n != neighbor);
        before - self.two_hop_neighbors.len()
    }

    // --- MPR Set (derived) ---

    pub fn mpr_set(&self) -> &BTreeSet<Ipv4Addr> {
        &self.mpr_set
    }

    pub fn set_mpr_set(&mut self, mpr_set: BTreeSet<Ipv4Addr>) {
        self.mpr_set = mpr_set;
    }

    pub fn find_mpr_address(&self, addr: Ipv4Addr) -> bool {
        self.mpr_set.contains(&addr)
    }

    // --- MPR Selector Set ---

    pub fn mpr_selectors(&self) -> impl Iterator<Item = &MprSelectorTuple> {
        self.mpr_selectors.values()
    }

    pub fn find_mpr_selector_tuple(&self, main_addr: Ipv4Addr) -> Option<&MprSelectorTuple> {
        self.mpr_selectors.get(&main_addr)
    }

    pub fn find_mpr_selector_tuple_mut(
        &mut self,
        main_addr: Ipv4Addr,
    ) -> Option<&mut MprSelectorTuple> {
        self.mpr_selectors.get_mut(&main_addr)
    }

    pub fn insert_mpr_selector_tuple(&mut self, tuple: MprSelectorTuple) {
        self.mpr_selectors.insert(tuple.main_addr, tuple);
    }

    pub fn erase_mpr_selector_tuple(&mut self, main_addr: Ipv4Addr) -> Option<MprSelectorTuple> {
        self.mpr_selectors.remove(&main_addr)
    }

    pub fn print_mpr_selector_set(&self) -> String {
        let addrs: Vec<String> = self
            .mpr_selectors
            .keys()
            .map(|a| a.to_string())
            .collect();
        format!("MPR selectors: [{}]", addrs.join(", "))
    }

    // --- Topology Set ---

    pub fn topology_set(&self) -> impl Iterator<Item = &TopologyTuple> {
        self.topology.values()
    }

    pub fn find_topology_tuple(&self, dest: Ipv4Addr, last: Ipv4Addr) -> Option<&TopologyTuple> {
        self.topology.get(&(dest, last))
    }

    pub fn find_topology_tuple_mut(
        &mut self,
        dest: Ipv4Addr,
        last: Ipv4Addr,
    ) -> Option<&mut TopologyTuple> {
        self.topology.get_mut(&(dest, last))
    }

    /// A tuple from `last` whose sequence number is newer than `ansn`.
    pub fn find_newer_topology_tuple(&self, last: Ipv4Addr, ansn: u16) -> Option<&TopologyTuple> {
        self.topology
            .values()
            .find(|t| t.last_addr == last && seq_newer(t.sequence_number, ansn))
    }

    /// Remove tuples from `last` whose sequence number is older than `ansn`.
    pub fn erase_older_topology_tuples(&mut self, last: Ipv4Addr, ansn: u16) -> usize {
        let before = self.topology.len();
        self.topology
            .retain(|_, t| !(t.last_addr == last && seq_newer(ansn, t.sequence_number)));
        before - self.topology.len()
    }

    pub fn insert_topology_tuple(&mut self, tuple: TopologyTuple) {
        self.topology.insert((tuple.dest_addr, tuple.last_addr), tuple);
    }

    pub fn erase_topology_tuple(&mut self, dest: Ipv4Addr, last: Ipv4Addr) -> Option<TopologyTuple> {
        self.topology.remove(&(dest, last))
    }

    // --- Duplicate Set ---

    pub fn duplicates(&self) -> impl Iterator<Item = &DuplicateTuple> {
        self.duplicates.values()
    }

    pub fn find_duplicate_tuple(&self, address: Ipv4Addr, seq: u16) -> Option<&DuplicateTuple> {
        self.duplicates.get(&(address, seq))
    }

    pub fn find_duplicate_tuple_mut(
        &mut self,
        address: Ipv4Addr,
        seq: u16,
    ) -> Option<&mut DuplicateTuple> {
        self.duplicates.get_mut(&(address, seq))
    }

    pub fn insert_duplicate_tuple(&mut self, tuple: DuplicateTuple) {
        self.duplicates
            .insert((tuple.address, tuple.sequence_number), tuple);
    }

    pub fn erase_duplicate_tuple(&mut self, address: Ipv4Addr, seq: u16) -> Option<DuplicateTuple> {
        self.duplicates.remove(&(address, seq))
    }

    // --- Interface Association Set ---

    pub fn iface_assoc_set(&self) -> impl Iterator<Item = &IfaceAssocTuple> {
        self.iface_assoc.values()
    }

    pub fn find_iface_assoc_tuple(&self, iface_addr: Ipv4Addr) -> Option<&IfaceAssocTuple> {
        self.iface_assoc.get(&iface_addr)
    }

    pub fn find_iface_assoc_tuple_mut(
        &mut self,
        iface_addr: Ipv4Addr,
    ) -> Option<&mut IfaceAssocTuple> {
        self.iface_assoc.get_mut(&iface_addr)
    }

    pub fn insert_iface_assoc_tuple(&mut self, tuple: IfaceAssocTuple) {
        self.iface_assoc.insert(tuple.iface_addr, tuple);
    }

    pub fn erase_iface_assoc_tuple(&mut self, iface_addr: Ipv4Addr) -> Option<IfaceAssocTuple> {
        self.iface_assoc.remove(&iface_addr)
    }

    /// Interface addresses known to belong to the node owning `iface_addr`,
    /// other than `iface_addr` itself.
    pub fn find_neighbor_interfaces(&self, iface_addr: Ipv4Addr) -> Vec<Ipv4Addr> {
        let main = self.main_address(iface_addr);
        let mut out: Vec<Ipv4Addr> = self
            .iface_assoc
            .values()
            .filter(|t| t.main_addr == main && t.iface_addr != iface_addr)
            .map(|t| t.iface_addr)
            .collect();
        if main != iface_addr && !out.contains(&main) {
            out.insert(0, main);
        }
        out
    }

    /// Main address of the node owning `iface_addr`, or `iface_addr` itself
    /// when no MID has associated it.
    pub fn main_address(&self, iface_addr: Ipv4Addr) -> Ipv4Addr {
        self.iface_assoc
            .get(&iface_addr)
            .map_or(iface_addr, |t| t.main_addr)
    }

    /// Re-key neighbor and 2-hop tuples recorded under `iface_addr` to
    /// `main_addr` once a MID reveals they are the same node.
    pub fn alias_main_address(&mut self, iface_addr: Ipv4Addr, main_addr: Ipv4Addr) -> bool {
        if iface_addr == main_addr {
            return false;
        }
        let mut changed = false;

        if let Some(mut nb) = self.neighbors.remove(&iface_addr) {
            nb.neighbor_main_addr = main_addr;
            match self.neighbors.get_mut(&main_addr) {
                Some(existing) => {
                    if nb.is_symmetric() {
                        existing.status = NeighborStatus::Sym;
                    }
                }
                None => {
                    self.neighbors.insert(main_addr, nb);
                }
            }
            changed = true;
        }

        let stale: Vec<_> = self
            .two_hop_neighbors
            .keys()
            .filter(|(n, t)| *n == iface_addr || *t == iface_addr)
            .copied()
            .collect();
        for key in stale {
            if let Some(mut tuple) = self.two_hop_neighbors.remove(&key) {
                if tuple.neighbor_main_addr == iface_addr {
                    tuple.neighbor_main_addr = main_addr;
                }
                if tuple.two_hop_neighbor_addr == iface_addr {
                    tuple.two_hop_neighbor_addr = main_addr;
                }
                let key = (tuple.neighbor_main_addr, tuple.two_hop_neighbor_addr);
                let keep = self
                    .two_hop_neighbors
                    .get(&key)
                    .is_none_or(|t| t.expiration_time < tuple.expiration_time);
                if keep {
                    self.two_hop_neighbors.insert(key, tuple);
                }
                changed = true;
            }
        }
        changed
    }

    // --- Association Set (learned via HNA) ---

    pub fn association_set(&self) -> impl Iterator<Item = &AssociationTuple> {
        self.associations.values()
    }

    pub fn find_association_tuple(
        &self,
        gateway: Ipv4Addr,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
    ) -> Option<&AssociationTuple> {
        self.associations.get(&(gateway, network, netmask))
    }

    pub fn find_association_tuple_mut(
        &mut self,
        gateway: Ipv4Addr,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
    ) -> Option<&mut AssociationTuple> {
        self.associations.get_mut(&(gateway, network, netmask))
    }

    pub fn insert_association_tuple(&mut self, tuple: AssociationTuple) {
        self.associations
            .insert((tuple.gateway_addr, tuple.network_addr, tuple.netmask), tuple);
    }

    pub fn erase_association_tuple(
        &mut self,
        gateway: Ipv4Addr,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
    ) -> Option<AssociationTuple> {
        self.associations.remove(&(gateway, network, netmask))
    }

    // --- Local associations (announced by this node) ---

    pub fn associations(&self) -> &BTreeSet<Association> {
        &self.local_associations
    }

    /// Returns false if the association was already present.
    pub fn insert_association(&mut self, assoc: Association) -> bool {
        self.local_associations.insert(assoc)
    }

    pub fn erase_association(&mut self, assoc: &Association) -> bool {
        self.local_associations.remove(assoc)
    }

    // --- Expiry ---

    /// Remove every tuple whose holding time lies before `now`.
    ///
    /// Neighbor tuples have no holding time of their own; the caller
    /// reconciles them against the surviving links.
    pub fn expire(&mut self, now: Time) -> Expired {
        let mut expired = Expired::default();

        let dead: Vec<_> = self
            .links
            .iter()
            .filter(|(_, l)| !l.is_valid(now))
            .map(|(k, _)| *k)
            .collect();
        expired.links = dead.iter().filter_map(|k| self.links.remove(k)).collect();

        expired.two_hop_neighbors = retain_count(&mut self.two_hop_neighbors, |t| {
            t.expiration_time >= now
        });
        expired.mpr_selectors = retain_count(&mut self.mpr_selectors, |t| t.expiration_time >= now);
        expired.topology = retain_count(&mut self.topology, |t| t.expiration_time >= now);
        expired.duplicates = retain_count(&mut self.duplicates, |t| t.expiration_time >= now);
        expired.iface_assoc = retain_count(&mut self.iface_assoc, |t| t.time >= now);
        expired.associations = retain_count(&mut self.associations, |t| t.expiration_time >= now);

        expired
    }

    /// Earliest instant after `now` at which a sweep would change something:
    /// a tuple expiring or a link losing its symmetric status.
    pub fn next_deadline(&self, now: Time) -> Option<Time> {
        let link_times = self
            .links
            .values()
            .flat_map(|l| [l.time, l.sym_time, l.asym_time]);
        let times = link_times
            .chain(self.two_hop_neighbors.values().map(|t| t.expiration_time))
            .chain(self.mpr_selectors.values().map(|t| t.expiration_time))
            .chain(self.topology.values().map(|t| t.expiration_time))
            .chain(self.duplicates.values().map(|t| t.expiration_time))
            .chain(self.iface_assoc.values().map(|t| t.time))
            .chain(self.associations.values().map(|t| t.expiration_time));

        // Holding times are inclusive, so a tuple is gone just after its time.
        times
            .filter(|t| *t >= now)
            .min()
            .map(|t| t + Duration::from_nanos(1))
    }

    /// Multi-line human-readable view of every set, for diagnostics.
    pub fn describe(&self, now: Time) -> String {
        StateReport { state: self, now }.to_string()
    }
}

/// Display adapter behind [`OlsrState::describe`].
struct StateReport<'a> {
    state: &'a OlsrState,
    now: Time,
}

impl fmt::Display for StateReport<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let StateReport { state, now } = *self;
        writeln!(out, "Links ({}):", state.links.len())?;
        for l in state.links.values() {
            writeln!(
                out,
                "  {} -> {} sym={} heard={} until {}",
                l.local_iface_addr,
                l.neighbor_iface_addr,
                l.is_symmetric(now),
                l.is_heard(now),
                l.time
            )?;
        }
        writeln!(out, "Neighbors ({}):", state.neighbors.len())?;
        for n in state.neighbors.values() {
            writeln!(
                out,
                "  {} {:?} willingness={}",
                n.neighbor_main_addr,
                n.status,
                n.willingness.value()
            )?;
        }
        writeln!(out, "Two-hop neighbors ({}):", state.two_hop_neighbors.len())?;
        for t in state.two_hop_neighbors.values() {
            writeln!(
                out,
                "  {} via {} until {}",
                t.two_hop_neighbor_addr, t.neighbor_main_addr, t.expiration_time
            )?;
        }
        let mprs: Vec<String> = state.mpr_set.iter().map(|a| a.to_string()).collect();
        writeln!(out, "MPR set: [{}]", mprs.join(", "))?;
        writeln!(out, "{}", state.print_mpr_selector_set())?;
        writeln!(out, "Topology ({}):", state.topology.len())?;
        for t in state.topology.values() {
            writeln!(
                out,
                "  {} via {} seq={} until {}",
                t.dest_addr, t.last_addr, t.sequence_number, t.expiration_time
            )?;
        }
        writeln!(out, "Interface associations ({}):", state.iface_assoc.len())?;
        for t in state.iface_assoc.values() {
            writeln!(out, "  {} is {}", t.iface_addr, t.main_addr)?;
        }
        writeln!(out, "Associations ({}):", state.associations.len())?;
        for t in state.associations.values() {
            writeln!(
                out,
                "  {}/{} via {}",
                t.network_addr, t.netmask, t.gateway_addr
            )?;
        }
        Ok(())
    }
}

fn retain_count<K: Ord, V>(map: &mut BTreeMap<K, V>, mut keep: impl FnMut(&V) -> bool) -> usize {
    let before = map.len();
    map.retain(|_, v| keep(v));
    before - map.len()
}
