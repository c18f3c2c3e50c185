// src/node.rs
//! High-level OLSR node abstraction.
//!
//! This wraps Packet + Message + OlsrState + RoutingTable into one engine
//! with two entry points: [`OlsrNode::receive`] for inbound packets and
//! [`OlsrNode::on_timer`] for scheduled work. Nothing here touches a socket
//! or a clock; the host passes the current time in, then drains encoded
//! packets with [`OlsrNode::drain_outgoing`] and events with
//! [`OlsrNode::drain_events`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::config::OlsrConfig;
use crate::error::{ConfigError, OlsrError};
use crate::event::Event;
use crate::message::{
    Hello, Hna, HnaAssociation, LinkMessage, LinkType, Message, MessageBody, Mid, NeighborType,
    Tc, Willingness, link_code,
};
use crate::mpr::compute_mpr_set;
use crate::neighbor::{self, HelloReceipt, NeighborChange};
use crate::packet::{MAX_MESSAGES_PER_PACKET, Packet};
use crate::repository::{Association, NeighborStatus, OlsrState};
use crate::routing::{NetworkRoute, RoutingTable, RoutingTableEntry};
use crate::scheduler::{Scheduler, Task, TaskKind};
use crate::time::Time;
use crate::topology::{self, Receipt};

/// TTL of flooded messages.
const MAX_TTL: u8 = 255;

/// An encoded packet ready to be broadcast on one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub interface: u32,
    pub bytes: Vec<u8>,
}

/// What a batch of processing touched.
#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    /// Links, neighbors or 2-hop neighbors changed: recompute MPRs and routes.
    neighborhood: bool,
    /// Topology or associations changed: recompute routes.
    routes: bool,
}

/// A single-threaded OLSR routing engine for one node.
pub struct OlsrNode {
    config: OlsrConfig,
    main_addr: Ipv4Addr,
    willingness: Willingness,

    /// Interface index -> address, for every configured interface.
    interfaces: BTreeMap<u32, Ipv4Addr>,
    /// Address -> interface index.
    local_ifaces: BTreeMap<Ipv4Addr, u32>,
    local_addrs: BTreeSet<Ipv4Addr>,
    excluded: BTreeSet<u32>,
    down: BTreeSet<u32>,
    /// Networks taken from an external routing table, announced via HNA.
    table_associations: BTreeSet<Association>,

    state: OlsrState,
    routes: RoutingTable,
    scheduler: Scheduler,
    rng: StdRng,

    message_seq: u16,
    packet_seq: u16,
    ansn: u16,
    now: Time,

    /// Messages waiting for the next flush, with the interface they are
    /// restricted to (`None` for all).
    queued: Vec<(Option<u32>, Message)>,
    outgoing: Vec<Outgoing>,
    events: Vec<Event>,
}

impl OlsrNode {
    /// Create a node from a validated configuration. `seed` drives jitter.
    pub fn new(config: OlsrConfig, seed: u64) -> Result<Self, OlsrError> {
        config.validate()?;
        let main_index = config
            .main_interface_index()
            .ok_or(ConfigError::NoInterfaces)?;
        let main_addr = config
            .interface(main_index)
            .ok_or(ConfigError::UnknownInterface(main_index))?
            .address;
        let willingness = Willingness::new(config.willingness)
            .ok_or(ConfigError::InvalidWillingness(config.willingness))?;

        let interfaces: BTreeMap<u32, Ipv4Addr> = config
            .interfaces
            .iter()
            .map(|i| (i.index, i.address))
            .collect();
        let local_ifaces = interfaces.iter().map(|(i, a)| (*a, *i)).collect();
        let local_addrs = interfaces.values().copied().collect();

        let mut state = OlsrState::new();
        for net in &config.host_networks {
            state.insert_association(Association {
                network_addr: net.address,
                netmask: net.netmask,
            });
        }

        Ok(OlsrNode {
            main_addr,
            willingness,
            interfaces,
            local_ifaces,
            local_addrs,
            excluded: config.excluded_interfaces.clone(),
            down: BTreeSet::new(),
            table_associations: BTreeSet::new(),
            state,
            routes: RoutingTable::new(),
            scheduler: Scheduler::new(),
            rng: StdRng::seed_from_u64(seed),
            message_seq: 0,
            packet_seq: 0,
            ansn: 0,
            now: Time::ZERO,
            queued: Vec::new(),
            outgoing: Vec::new(),
            events: Vec::new(),
            config,
        })
    }

    /// Schedule the first round of periodic emissions at `now`.
    pub fn start(&mut self, now: Time) {
        self.now = now;
        info!(
            main = %self.main_addr,
            interfaces = self.interfaces.len(),
            willingness = self.willingness.value(),
            "OLSR node starting"
        );
        for kind in [TaskKind::Hello, TaskKind::Tc, TaskKind::Mid, TaskKind::Hna] {
            self.scheduler.schedule(now, kind);
        }
    }

    /// When [`OlsrNode::on_timer`] next has work to do.
    pub fn next_deadline(&self) -> Option<Time> {
        self.scheduler.next_due()
    }

    /// Run every task due at or before `now`, each at its own due time.
    pub fn on_timer(&mut self, now: Time) {
        while let Some(task) = self.scheduler.pop_due(now) {
            self.now = task.due;
            if let Err(e) = self.run_task(task) {
                warn!(task = ?task.kind, error = %e, "scheduled task failed");
            }
        }
        self.now = now;
    }

    fn run_task(&mut self, task: Task) -> Result<(), OlsrError> {
        let now = task.due;
        match task.kind {
            TaskKind::Hello => {
                self.scheduler
                    .schedule(now + self.config.hello_interval(), TaskKind::Hello);
                self.send_hello(now)
            }
            TaskKind::Tc => {
                self.scheduler
                    .schedule(now + self.config.tc_interval(), TaskKind::Tc);
                self.send_tc(now)
            }
            TaskKind::Mid => {
                self.scheduler
                    .schedule(now + self.config.mid_interval(), TaskKind::Mid);
                self.send_mid(now)
            }
            TaskKind::Hna => {
                self.scheduler
                    .schedule(now + self.config.hna_interval(), TaskKind::Hna);
                self.send_hna(now)
            }
            TaskKind::SendQueued => self.send_queued(),
            TaskKind::Expire => {
                self.sweep(now);
                Ok(())
            }
        }
    }

    // --- Receive path ---

    /// Process one packet received on `interface` from the neighbor
    /// interface address `sender`.
    ///
    /// A packet that fails to decode is rejected as a whole and leaves the
    /// state untouched.
    pub fn receive(
        &mut self,
        now: Time,
        interface: u32,
        sender: Ipv4Addr,
        bytes: &[u8],
    ) -> Result<(), OlsrError> {
        self.now = now;
        let local = *self
            .interfaces
            .get(&interface)
            .ok_or(OlsrError::UnknownInterface(interface))?;
        if !self.is_active(interface) {
            return Err(OlsrError::ExcludedInterface(interface));
        }

        let packet = Packet::from_bytes(bytes).map_err(|e| {
            debug!(%sender, interface, error = %e, "dropping malformed packet");
            e
        })?;
        trace!(
            %sender,
            interface,
            seq = packet.sequence_number,
            messages = packet.messages.len(),
            "packet received"
        );

        let selectors = self.selector_snapshot();
        let mut dirty = Dirty::default();
        for msg in &packet.messages {
            self.process_message(now, local, sender, msg, &mut dirty);
        }
        self.after_change(now, dirty, &selectors);
        Ok(())
    }

    fn process_message(
        &mut self,
        now: Time,
        local: Ipv4Addr,
        sender: Ipv4Addr,
        msg: &Message,
        dirty: &mut Dirty,
    ) {
        if msg.time_to_live == 0 || self.local_addrs.contains(&msg.originator) {
            trace!(originator = %msg.originator, ttl = msg.time_to_live, "message ignored");
            return;
        }
        let rx = Receipt::for_message(now, local, sender, msg);

        if self
            .state
            .find_duplicate_tuple(msg.originator, msg.sequence_number)
            .is_some()
        {
            trace!(
                originator = %msg.originator,
                seq = msg.sequence_number,
                "duplicate message not processed"
            );
        } else {
            match &msg.body {
                MessageBody::Hello(hello) => self.process_hello(hello, &rx, dirty),
                MessageBody::Tc(tc) => {
                    dirty.routes |= topology::process_tc(&mut self.state, tc, &rx);
                }
                MessageBody::Mid(mid) => {
                    dirty.neighborhood |= topology::process_mid(&mut self.state, mid, &rx);
                }
                MessageBody::Hna(hna) => {
                    dirty.routes |= topology::process_hna(&mut self.state, hna, &rx);
                }
            }
        }

        if msg.hello().is_some() || topology::seen_on(&self.state, msg, local) {
            return;
        }
        if let Some(relay) =
            topology::forward_default(&mut self.state, msg, &rx, self.config.dup_hold())
        {
            if let Err(e) = self.queue_message(now, None, relay) {
                warn!(originator = %msg.originator, error = %e, "relay failed");
            }
        }
    }

    fn process_hello(&mut self, hello: &Hello, rx: &Receipt, dirty: &mut Dirty) {
        let originator = rx.originator;
        let willingness_before = self
            .state
            .find_neighbor_tuple(originator)
            .map(|n| n.willingness);

        let receipt = HelloReceipt {
            now: rx.now,
            receiver_iface: rx.local_iface,
            sender_iface: rx.sender_iface,
            originator,
            vtime: rx.vtime,
            neighbor_hold: self.config.neighbor_hold(),
            main_addr: self.main_addr,
            local_addrs: &self.local_addrs,
        };
        dirty.neighborhood |= neighbor::link_sensing(&mut self.state, hello, &receipt);
        let change = neighbor::update_neighbor_status(
            &mut self.state,
            originator,
            Some(hello.willingness),
            rx.now,
        );
        neighbor::populate_neighbor_set(&mut self.state, originator, hello.willingness);
        dirty.neighborhood |=
            neighbor::populate_two_hop_neighbor_set(&mut self.state, hello, &receipt);
        neighbor::populate_mpr_selector_set(&mut self.state, hello, &receipt);

        let willingness_after = self
            .state
            .find_neighbor_tuple(originator)
            .map(|n| n.willingness);
        if willingness_before.is_some() && willingness_before != willingness_after {
            dirty.neighborhood = true;
        }

        if let Some(change) = change {
            dirty.neighborhood = true;
            self.neighbor_events(change);
        }
    }

    fn neighbor_events(&mut self, change: NeighborChange) {
        let NeighborChange { addr, before, after } = change;
        debug!(neighbor = %addr, ?before, ?after, "neighbor status changed");
        match (before, after) {
            (None, Some(status)) => {
                self.push_event(Event::NeighborUp(addr));
                if status == NeighborStatus::Sym {
                    self.push_event(Event::NeighborSymmetric(addr));
                }
            }
            (Some(NeighborStatus::NotSym), Some(NeighborStatus::Sym)) => {
                self.push_event(Event::NeighborSymmetric(addr));
            }
            (Some(NeighborStatus::Sym), Some(NeighborStatus::NotSym)) => {
                self.push_event(Event::NeighborLost(addr));
            }
            (Some(status), None) => {
                if status == NeighborStatus::Sym {
                    self.push_event(Event::NeighborLost(addr));
                }
                self.push_event(Event::NeighborDown(addr));
            }
            _ => {}
        }
    }

    fn selector_snapshot(&self) -> Vec<Ipv4Addr> {
        self.state.mpr_selectors().map(|s| s.main_addr).collect()
    }

    /// Re-derive everything that depends on what `dirty` says changed.
    fn after_change(&mut self, now: Time, dirty: Dirty, selectors_before: &[Ipv4Addr]) {
        if self.selector_snapshot() != selectors_before {
            self.ansn = self.ansn.wrapping_add(1);
            debug!(ansn = self.ansn, "MPR selector set changed");
        }

        if dirty.neighborhood {
            let mprs = compute_mpr_set(&self.state, &self.local_addrs);
            if mprs != *self.state.mpr_set() {
                debug!(mprs = ?mprs, "MPR set changed");
                self.state.set_mpr_set(mprs.clone());
                self.push_event(Event::MprSetChanged(mprs));
            }
        }

        if dirty.neighborhood || dirty.routes {
            self.recompute_routes(now);
        }
        self.reschedule_expiry(now);
    }

    fn recompute_routes(&mut self, now: Time) {
        let table = RoutingTable::compute(&self.state, &self.local_ifaces, now);
        if table == self.routes {
            return;
        }
        debug!(
            hosts = table.entries().count(),
            networks = table.network_routes().count(),
            "routing table changed"
        );
        self.routes = table;
        let entries = self.routes.entries().copied().collect();
        self.push_event(Event::RoutingTableChanged(entries));
    }

    /// Keep exactly one expiry sweep pending, at the repository's next deadline.
    fn reschedule_expiry(&mut self, now: Time) {
        let due = self.state.next_deadline(now);
        if self.scheduler.due_of(TaskKind::Expire) == due {
            return;
        }
        self.scheduler.cancel(TaskKind::Expire);
        if let Some(due) = due {
            self.scheduler.schedule(due, TaskKind::Expire);
        }
    }

    /// Drop expired tuples and propagate the consequences.
    fn sweep(&mut self, now: Time) {
        let selectors = self.selector_snapshot();
        let expired = self.state.expire(now);
        let changes = neighbor::reconcile_neighbors(&mut self.state, now);
        if !expired.is_empty() {
            trace!(?expired, "expired tuples removed");
        }

        let dirty = Dirty {
            neighborhood: !changes.is_empty()
                || !expired.links.is_empty()
                || expired.two_hop_neighbors > 0,
            routes: expired.affects_routes(),
        };
        for change in changes {
            self.neighbor_events(change);
        }
        self.after_change(now, dirty, &selectors);
    }

    // --- Emission ---

    fn is_active(&self, index: u32) -> bool {
        !self.excluded.contains(&index) && !self.down.contains(&index)
    }

    fn active_interfaces(&self) -> Vec<(u32, Ipv4Addr)> {
        self.interfaces
            .iter()
            .filter(|(index, _)| self.is_active(**index))
            .map(|(index, addr)| (*index, *addr))
            .collect()
    }

    fn next_message_seq(&mut self) -> u16 {
        self.message_seq = self.message_seq.wrapping_add(1);
        self.message_seq
    }

    /// HELLO advertising the links of the interface with address `local`.
    ///
    /// Neighbors reachable only through other interfaces are listed with
    /// link type UNSPEC so 2-hop neighbors are learned across interfaces.
    fn build_hello(&self, local: Ipv4Addr, now: Time) -> Hello {
        let on_this_iface: BTreeSet<Ipv4Addr> = self
            .state
            .links()
            .filter(|l| l.local_iface_addr == local && l.is_valid(now))
            .map(|l| self.state.main_address(l.neighbor_iface_addr))
            .collect();

        let mut groups: BTreeMap<u8, Vec<Ipv4Addr>> = BTreeMap::new();
        for link in self.state.links() {
            if !link.is_valid(now) {
                continue;
            }
            let main = self.state.main_address(link.neighbor_iface_addr);
            let link_type = if link.local_iface_addr != local {
                if on_this_iface.contains(&main) {
                    continue;
                }
                LinkType::Unspec
            } else if link.is_symmetric(now) {
                LinkType::Sym
            } else if link.is_heard(now) {
                LinkType::Asym
            } else {
                LinkType::Lost
            };
            let neighbor_type = if self.state.find_mpr_address(main) {
                NeighborType::Mpr
            } else {
                match self.state.find_neighbor_tuple(main) {
                    Some(nb) if nb.is_symmetric() => NeighborType::Sym,
                    _ => NeighborType::Not,
                }
            };
            let needs_sym = matches!(link_type, LinkType::Sym | LinkType::Unspec);
            if needs_sym && neighbor_type == NeighborType::Not {
                continue;
            }

            let addrs = groups
                .entry(link_code(link_type, neighbor_type))
                .or_default();
            let aliases = self.state.find_neighbor_interfaces(link.neighbor_iface_addr);
            for addr in std::iter::once(link.neighbor_iface_addr).chain(aliases) {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }

        let mut hello = Hello {
            h_time: 0,
            willingness: self.willingness,
            link_messages: groups
                .into_iter()
                .map(|(link_code, addrs)| LinkMessage {
                    link_code,
                    neighbor_interface_addresses: addrs,
                })
                .collect(),
        };
        hello.set_h_time(self.config.hello_interval());
        hello
    }

    fn send_hello(&mut self, now: Time) -> Result<(), OlsrError> {
        for (index, local) in self.active_interfaces() {
            let hello = self.build_hello(local, now);
            let seq = self.next_message_seq();
            let msg = Message::new(
                self.main_addr,
                seq,
                self.config.neighbor_hold(),
                1,
                MessageBody::Hello(hello),
            );
            self.queue_message(now, Some(index), msg)?;
        }
        Ok(())
    }

    fn send_tc(&mut self, now: Time) -> Result<(), OlsrError> {
        let selectors = self.selector_snapshot();
        if selectors.is_empty() {
            return Ok(());
        }
        let seq = self.next_message_seq();
        let msg = Message::new(
            self.main_addr,
            seq,
            self.config.top_hold(),
            MAX_TTL,
            MessageBody::Tc(Tc {
                ansn: self.ansn,
                neighbor_addresses: selectors,
            }),
        );
        self.queue_message(now, None, msg)
    }

    fn send_mid(&mut self, now: Time) -> Result<(), OlsrError> {
        let aliases: Vec<Ipv4Addr> = self
            .active_interfaces()
            .into_iter()
            .map(|(_, addr)| addr)
            .filter(|addr| *addr != self.main_addr)
            .collect();
        if aliases.is_empty() {
            return Ok(());
        }
        let seq = self.next_message_seq();
        let msg = Message::new(
            self.main_addr,
            seq,
            self.config.mid_hold(),
            MAX_TTL,
            MessageBody::Mid(Mid {
                interface_addresses: aliases,
            }),
        );
        self.queue_message(now, None, msg)
    }

    /// Networks announced via HNA: operator-added plus routing-table ones.
    pub fn announced_networks(&self) -> BTreeSet<Association> {
        self.state
            .associations()
            .union(&self.table_associations)
            .copied()
            .collect()
    }

    fn send_hna(&mut self, now: Time) -> Result<(), OlsrError> {
        let associations: Vec<HnaAssociation> = self
            .announced_networks()
            .into_iter()
            .map(|a| HnaAssociation {
                address: a.network_addr,
                mask: a.netmask,
            })
            .collect();
        if associations.is_empty() {
            return Ok(());
        }
        let seq = self.next_message_seq();
        let msg = Message::new(
            self.main_addr,
            seq,
            self.config.hna_hold(),
            MAX_TTL,
            MessageBody::Hna(Hna { associations }),
        );
        self.queue_message(now, None, msg)
    }

    /// Queue `msg` for the next flush, which happens after a random jitter
    /// (or immediately when jitter is disabled).
    fn queue_message(
        &mut self,
        now: Time,
        interface: Option<u32>,
        msg: Message,
    ) -> Result<(), OlsrError> {
        self.queued.push((interface, msg));
        let jitter = self.config.max_jitter();
        if jitter.is_zero() {
            return self.send_queued();
        }
        let max = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
        let delay = Duration::from_nanos(self.rng.random_range(0..max));
        self.scheduler.schedule_once(now + delay, TaskKind::SendQueued);
        Ok(())
    }

    /// Encode queued messages into packets, one batch per active interface.
    fn send_queued(&mut self) -> Result<(), OlsrError> {
        if self.queued.is_empty() {
            return Ok(());
        }
        let queued = std::mem::take(&mut self.queued);
        for (index, _) in self.active_interfaces() {
            let messages: Vec<Message> = queued
                .iter()
                .filter(|(target, _)| target.is_none_or(|t| t == index))
                .map(|(_, msg)| msg.clone())
                .collect();
            for chunk in messages.chunks(MAX_MESSAGES_PER_PACKET) {
                let packet = Packet::with_messages(self.packet_seq, chunk.to_vec());
                self.packet_seq = self.packet_seq.wrapping_add(1);
                let bytes = packet.to_bytes()?;
                trace!(
                    interface = index,
                    seq = packet.sequence_number,
                    messages = chunk.len(),
                    len = bytes.len(),
                    "sending packet"
                );
                self.outgoing.push(Outgoing {
                    interface: index,
                    bytes,
                });
            }
        }
        Ok(())
    }

    // --- Operator interface ---

    /// Replace the set of interfaces ignored for protocol operation.
    ///
    /// Links on newly excluded interfaces are dropped at once; emissions
    /// pick up the change on their next run.
    pub fn set_interface_exclusions(&mut self, exclusions: BTreeSet<u32>) -> Result<(), OlsrError> {
        if let Some(unknown) = exclusions.iter().find(|i| !self.interfaces.contains_key(i)) {
            return Err(OlsrError::UnknownInterface(*unknown));
        }
        info!(?exclusions, "interface exclusions set");
        let newly: Vec<u32> = exclusions.difference(&self.excluded).copied().collect();
        self.excluded = exclusions;
        for index in newly {
            self.drop_interface_links(index);
        }
        Ok(())
    }

    pub fn interface_exclusions(&self) -> &BTreeSet<u32> {
        &self.excluded
    }

    /// Announce `network/netmask` via HNA. Returns false if already announced.
    pub fn add_host_network_association(&mut self, network: Ipv4Addr, netmask: Ipv4Addr) -> bool {
        info!(%network, %netmask, "adding host network association");
        let added = self.state.insert_association(Association {
            network_addr: network,
            netmask,
        });
        if added {
            self.recompute_routes(self.now);
        }
        added
    }

    /// Stop announcing `network/netmask`. Returns false if it was not announced.
    pub fn remove_host_network_association(
        &mut self,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
    ) -> bool {
        info!(%network, %netmask, "removing host network association");
        let removed = self.state.erase_association(&Association {
            network_addr: network,
            netmask,
        });
        if removed {
            self.recompute_routes(self.now);
        }
        removed
    }

    /// Announce the networks of an external static routing table via HNA,
    /// replacing any previously set table.
    pub fn set_routing_table_association(&mut self, networks: impl IntoIterator<Item = Association>) {
        self.table_associations = networks.into_iter().collect();
        info!(
            networks = self.table_associations.len(),
            "routing table association set"
        );
    }

    /// Make the interface `index` the source of the node's main address.
    pub fn set_main_interface(&mut self, index: u32) -> Result<(), OlsrError> {
        let addr = *self
            .interfaces
            .get(&index)
            .ok_or(OlsrError::UnknownInterface(index))?;
        info!(index, main = %addr, "main interface set");
        self.main_addr = addr;
        Ok(())
    }

    /// The interface went down: drop its links and everything depending on them.
    pub fn notify_interface_down(&mut self, index: u32) -> Result<(), OlsrError> {
        if !self.interfaces.contains_key(&index) {
            return Err(OlsrError::UnknownInterface(index));
        }
        info!(index, "interface down");
        self.down.insert(index);
        self.drop_interface_links(index);
        Ok(())
    }

    /// The interface is back and takes part in the protocol again.
    pub fn notify_interface_up(&mut self, index: u32) -> Result<(), OlsrError> {
        if !self.interfaces.contains_key(&index) {
            return Err(OlsrError::UnknownInterface(index));
        }
        info!(index, "interface up");
        self.down.remove(&index);
        Ok(())
    }

    fn drop_interface_links(&mut self, index: u32) {
        let Some(addr) = self.interfaces.get(&index).copied() else {
            return;
        };
        let now = self.now;
        let selectors = self.selector_snapshot();
        let dropped = self.state.erase_link_tuples_on(addr);
        if dropped.is_empty() {
            return;
        }
        debug!(index, links = dropped.len(), "links dropped with interface");
        let changes = neighbor::reconcile_neighbors(&mut self.state, now);
        for change in changes {
            self.neighbor_events(change);
        }
        let dirty = Dirty {
            neighborhood: true,
            routes: true,
        };
        self.after_change(now, dirty, &selectors);
    }

    // --- Queries ---

    pub fn main_address(&self) -> Ipv4Addr {
        self.main_addr
    }

    pub fn willingness(&self) -> Willingness {
        self.willingness
    }

    /// Current advertised neighbor sequence number.
    pub fn ansn(&self) -> u16 {
        self.ansn
    }

    pub fn interface_address(&self, index: u32) -> Option<Ipv4Addr> {
        self.interfaces.get(&index).copied()
    }

    /// Immutable view of the protocol state.
    pub fn state(&self) -> &OlsrState {
        &self.state
    }

    pub fn mpr_set(&self) -> &BTreeSet<Ipv4Addr> {
        self.state.mpr_set()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routes
    }

    /// Host routes in ascending destination order.
    pub fn routing_table_entries(&self) -> Vec<RoutingTableEntry> {
        self.routes.entries().copied().collect()
    }

    pub fn network_routes(&self) -> Vec<NetworkRoute> {
        self.routes.network_routes().copied().collect()
    }

    /// Route used to reach `dest`: host route, else longest-prefix HNA route.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<RoutingTableEntry> {
        self.routes.lookup(dest).copied()
    }

    /// Multi-line view of the whole node, also logged at info.
    pub fn dump(&self) -> String {
        let out = NodeReport(self).to_string();
        info!(main = %self.main_addr, "state dump\n{out}");
        out
    }

    // --- Output ---

    fn push_event(&mut self, ev: Event) {
        self.events.push(ev);
    }

    /// Take and return all pending events since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Take and return all packets encoded since the last call.
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outgoing)
    }
}

/// Display adapter behind [`OlsrNode::dump`].
struct NodeReport<'a>(&'a OlsrNode);

impl fmt::Display for NodeReport<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.0;
        writeln!(
            out,
            "Node {} willingness={} ANSN={} at {}",
            node.main_addr,
            node.willingness.value(),
            node.ansn,
            node.now
        )?;
        out.write_str(&node.state.describe(node.now))?;
        writeln!(out, "Routes ({}):", node.routes.len())?;
        for entry in node.routes.entries() {
            writeln!(out, "  {}", entry.summary())?;
        }
        for route in node.routes.network_routes() {
            writeln!(out, "  {}", route.summary())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn config() -> OlsrConfig {
        OlsrConfig::new()
            .with_interface(1, ip(1))
            .max_jitter_ms(Some(0))
    }

    fn node() -> OlsrNode {
        let mut node = OlsrNode::new(config(), 7).unwrap();
        node.start(Time::ZERO);
        node
    }

    fn packet(messages: Vec<Message>) -> Vec<u8> {
        Packet::with_messages(1, messages).to_bytes().unwrap()
    }

    fn hello_from(from: u8, seq: u16, links: Vec<LinkMessage>) -> Message {
        Message::new(
            ip(from),
            seq,
            Duration::from_secs(6),
            1,
            MessageBody::Hello(Hello {
                h_time: 0x05,
                willingness: Willingness::DEFAULT,
                link_messages: links,
            }),
        )
    }

    fn decoded(out: &[Outgoing]) -> Vec<Message> {
        out.iter()
            .flat_map(|o| Packet::from_bytes(&o.bytes).unwrap().messages)
            .collect()
    }

    /// Make 10.0.0.2 a symmetric neighbor that selected us as MPR.
    fn with_selector(node: &mut OlsrNode, now: Time) {
        let hello = hello_from(
            2,
            1,
            vec![LinkMessage::new(LinkType::Sym, NeighborType::Mpr, vec![ip(1)])],
        );
        node.receive(now, 1, ip(2), &packet(vec![hello])).unwrap();
    }

    #[test]
    fn start_emits_hello() {
        let mut node = node();
        node.on_timer(Time::ZERO);
        let out = node.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].interface, 1);

        let msgs = decoded(&out);
        assert_eq!(msgs.len(), 1);
        let hello = msgs[0].hello().unwrap();
        assert_eq!(msgs[0].time_to_live, 1);
        assert_eq!(msgs[0].vtime(), Duration::from_secs(6));
        assert_eq!(hello.h_time(), Duration::from_secs(2));
        assert!(hello.link_messages.is_empty());

        assert_eq!(node.next_deadline(), Some(Time::from_secs(2)));
    }

    #[test]
    fn rejects_bad_input_without_state_change() {
        let mut node = node();
        let mut bytes = packet(vec![hello_from(2, 1, Vec::new())]);
        bytes.truncate(bytes.len() - 1);
        let err = node.receive(Time::ZERO, 1, ip(2), &bytes).unwrap_err();
        assert!(matches!(err, OlsrError::Decode(DecodeError::PacketLength { .. })));
        assert_eq!(node.state().links().count(), 0);

        let bytes = packet(vec![hello_from(2, 1, Vec::new())]);
        assert!(matches!(
            node.receive(Time::ZERO, 9, ip(2), &bytes),
            Err(OlsrError::UnknownInterface(9))
        ));
    }

    #[test]
    fn excluded_interface_is_ignored() {
        let config = config()
            .with_interface(2, Ipv4Addr::new(10, 1, 0, 1))
            .exclude_interface(2);
        let mut node = OlsrNode::new(config, 1).unwrap();
        let bytes = packet(vec![hello_from(2, 1, Vec::new())]);
        assert!(matches!(
            node.receive(Time::ZERO, 2, ip(2), &bytes),
            Err(OlsrError::ExcludedInterface(2))
        ));
        assert_eq!(node.interface_exclusions().len(), 1);
    }

    #[test]
    fn handshake_gives_symmetric_neighbor_and_route() {
        let mut node = node();
        node.on_timer(Time::ZERO);
        node.drain_outgoing();
        let now = Time::from_secs(1);
        node.receive(now, 1, ip(2), &packet(vec![hello_from(2, 1, Vec::new())]))
            .unwrap();
        assert_eq!(node.drain_events(), vec![Event::NeighborUp(ip(2))]);
        assert!(node.routing_table_entries().is_empty());

        // Our next HELLO lists 10.0.0.2 as heard.
        node.on_timer(Time::from_secs(2));
        let msgs = decoded(&node.drain_outgoing());
        let hello = msgs[0].hello().unwrap();
        assert_eq!(hello.link_messages[0].link_type(), LinkType::Asym);
        assert_eq!(hello.link_messages[0].neighbor_interface_addresses, vec![ip(2)]);

        let reply = hello_from(
            2,
            2,
            vec![LinkMessage::new(LinkType::Asym, NeighborType::Not, vec![ip(1)])],
        );
        node.receive(Time::from_secs(3), 1, ip(2), &packet(vec![reply]))
            .unwrap();
        let events = node.drain_events();
        assert!(events.contains(&Event::NeighborSymmetric(ip(2))));
        assert!(events.iter().any(|e| matches!(e, Event::RoutingTableChanged(_))));

        let route = node.lookup(ip(2)).unwrap();
        assert_eq!((route.next_addr, route.distance, route.interface), (ip(2), 1, 1));
    }

    #[test]
    fn selection_bumps_ansn_and_enables_tc() {
        let mut node = node();
        node.on_timer(Time::ZERO);
        node.drain_outgoing();
        assert_eq!(node.ansn(), 0);

        with_selector(&mut node, Time::from_secs(1));
        assert_eq!(node.ansn(), 1);
        assert!(node.state().find_mpr_selector_tuple(ip(2)).is_some());

        // TC interval is 5s.
        node.on_timer(Time::from_secs(5));
        let msgs = decoded(&node.drain_outgoing());
        let tc = msgs.iter().find_map(Message::tc).unwrap();
        assert_eq!(tc.ansn, 1);
        assert_eq!(tc.neighbor_addresses, vec![ip(2)]);
    }

    #[test]
    fn duplicate_tc_relayed_once() {
        let mut node = node();
        let now = Time::from_secs(1);
        with_selector(&mut node, now);
        node.drain_outgoing();

        let tc = Message::new(
            ip(2),
            50,
            Duration::from_secs(15),
            255,
            MessageBody::Tc(Tc {
                ansn: 3,
                neighbor_addresses: vec![ip(1), ip(9)],
            }),
        );
        let bytes = packet(vec![tc]);
        node.receive(now, 1, ip(2), &bytes).unwrap();
        let topology: Vec<_> = node.state().topology_set().cloned().collect();
        let relayed = decoded(&node.drain_outgoing());
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].time_to_live, 254);
        assert_eq!(relayed[0].hop_count, 1);

        node.receive(now, 1, ip(2), &bytes).unwrap();
        assert!(node.drain_outgoing().is_empty());
        let again: Vec<_> = node.state().topology_set().cloned().collect();
        assert_eq!(again, topology);
        assert_eq!(node.lookup(ip(9)).unwrap().distance, 2);
    }

    #[test]
    fn own_messages_are_ignored() {
        let mut node = node();
        let bytes = packet(vec![hello_from(1, 1, Vec::new())]);
        node.receive(Time::ZERO, 1, ip(2), &bytes).unwrap();
        assert_eq!(node.state().links().count(), 0);
    }

    #[test]
    fn expiry_follows_refreshed_tuples() {
        let mut node = node();
        with_selector(&mut node, Time::from_secs(1));
        let first = Time::from_secs(7) + Duration::from_nanos(1);
        assert_eq!(node.scheduler.due_of(TaskKind::Expire), Some(first));

        with_selector(&mut node, Time::from_secs(5));
        let refreshed = Time::from_secs(11) + Duration::from_nanos(1);
        assert_eq!(node.scheduler.due_of(TaskKind::Expire), Some(refreshed));
        assert_eq!(node.scheduler.cancel(TaskKind::Expire), 1);
    }

    #[test]
    fn neighbor_times_out() {
        let mut node = node();
        with_selector(&mut node, Time::from_secs(1));
        assert!(node.lookup(ip(2)).is_some());
        node.drain_events();

        node.on_timer(Time::from_secs(30));
        assert!(node.lookup(ip(2)).is_none());
        assert!(node.state().neighbors().next().is_none());
        assert!(node.state().mpr_selectors().next().is_none());
        let events = node.drain_events();
        assert!(events.contains(&Event::NeighborLost(ip(2))));
        assert!(events.contains(&Event::NeighborDown(ip(2))));
    }

    #[test]
    fn host_network_associations() {
        let mut node = node();
        let net = Ipv4Addr::new(192, 168, 1, 0);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        assert!(node.add_host_network_association(net, mask));
        assert!(!node.add_host_network_association(net, mask));

        node.on_timer(Time::ZERO);
        let msgs = decoded(&node.drain_outgoing());
        let hna = msgs.iter().find_map(Message::hna).unwrap();
        assert_eq!(hna.associations, vec![HnaAssociation { address: net, mask }]);

        node.set_routing_table_association([Association {
            network_addr: Ipv4Addr::new(172, 16, 0, 0),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
        }]);
        assert_eq!(node.announced_networks().len(), 2);

        assert!(node.remove_host_network_association(net, mask));
        assert!(!node.remove_host_network_association(net, mask));
        assert_eq!(node.announced_networks().len(), 1);
    }

    #[test]
    fn mid_lists_secondary_interfaces() {
        let config = config().with_interface(2, Ipv4Addr::new(10, 1, 0, 1));
        let mut node = OlsrNode::new(config, 3).unwrap();
        node.start(Time::ZERO);
        node.on_timer(Time::ZERO);
        let out = node.drain_outgoing();
        // HELLO and MID go out on both interfaces.
        assert!(out.iter().any(|o| o.interface == 2));
        let msgs = decoded(&out);
        let mid = msgs.iter().find_map(Message::mid).unwrap();
        assert_eq!(mid.interface_addresses, vec![Ipv4Addr::new(10, 1, 0, 1)]);
    }

    #[test]
    fn interface_down_drops_links() {
        let mut node = node();
        with_selector(&mut node, Time::from_secs(1));
        assert!(node.lookup(ip(2)).is_some());

        node.notify_interface_down(1).unwrap();
        assert!(node.lookup(ip(2)).is_none());
        assert_eq!(node.state().links().count(), 0);
        assert!(matches!(
            node.receive(Time::from_secs(2), 1, ip(2), &packet(Vec::new())),
            Err(OlsrError::ExcludedInterface(1))
        ));

        node.notify_interface_up(1).unwrap();
        assert!(node.receive(Time::from_secs(2), 1, ip(2), &packet(Vec::new())).is_ok());
        assert!(node.notify_interface_down(5).is_err());
    }

    #[test]
    fn exclusions_must_name_known_interfaces() {
        let mut node = node();
        assert!(matches!(
            node.set_interface_exclusions([4].into_iter().collect()),
            Err(OlsrError::UnknownInterface(4))
        ));
        with_selector(&mut node, Time::from_secs(1));
        node.set_interface_exclusions([1].into_iter().collect()).unwrap();
        assert_eq!(node.state().links().count(), 0);
    }

    #[test]
    fn main_interface_and_dump() {
        let config = config().with_interface(2, Ipv4Addr::new(10, 1, 0, 1));
        let mut node = OlsrNode::new(config, 3).unwrap();
        assert_eq!(node.main_address(), ip(1));
        node.set_main_interface(2).unwrap();
        assert_eq!(node.main_address(), Ipv4Addr::new(10, 1, 0, 1));
        assert!(node.set_main_interface(3).is_err());

        let dump = node.dump();
        assert!(dump.starts_with("Node 10.1.0.1"));
        assert!(dump.contains("MPR set: []"));

        with_selector(&mut node, Time::from_secs(1));
        let dump = node.dump();
        assert!(dump.contains("Routes (1):"));
        assert!(dump.contains("  10.0.0.2 via 10.0.0.2 iface=1 hops=1"));
        assert!(dump.contains("MPR selectors: [10.0.0.2]"));
    }
}
