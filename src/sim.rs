// src/sim.rs
//! Discrete event simulator for OLSR networks.
//!
//! Nodes are plain [`OlsrNode`] engines; the simulator owns the clock,
//! carries broadcast packets between linked interfaces with a fixed delay
//! and fires each node's timer at its next deadline.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::OlsrConfig;
use crate::error::OlsrError;
use crate::node::OlsrNode;
use crate::time::Time;

/// Propagation delay of every simulated link.
pub const LINK_DELAY: Duration = Duration::from_millis(1);

pub type NodeId = usize;

/// One interface of one simulated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub node: NodeId,
    pub interface: u32,
}

impl Endpoint {
    pub fn new(node: NodeId, interface: u32) -> Self {
        Self { node, interface }
    }
}

#[derive(Debug, Clone)]
enum SimEvent {
    Deliver {
        to: Endpoint,
        sender: Ipv4Addr,
        bytes: Vec<u8>,
    },
    Timer {
        node: NodeId,
    },
}

#[derive(Debug, Clone)]
struct Scheduled {
    time: Time,
    seq: u64,
    event: SimEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap: earlier time first, then lower sequence.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Packet counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub receive_errors: u64,
}

pub struct Simulator {
    nodes: Vec<OlsrNode>,
    /// Undirected links, stored with the smaller endpoint first.
    links: BTreeSet<(Endpoint, Endpoint)>,
    /// Per node, the time its pending timer fires.
    timers: Vec<Option<Time>>,
    queue: BinaryHeap<Scheduled>,
    next_seq: u64,
    now: Time,
    stats: SimStats,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: BTreeSet::new(),
            timers: Vec::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            now: Time::ZERO,
            stats: SimStats::default(),
        }
    }

    /// A chain of `count` single-interface nodes, node `i` at 10.0.0.(i+1)
    /// and linked to its successor. `tweak` adjusts each node's config.
    pub fn line(
        count: usize,
        seed: u64,
        tweak: impl Fn(NodeId, OlsrConfig) -> OlsrConfig,
    ) -> Result<Self, OlsrError> {
        let mut sim = Simulator::new();
        for i in 0..count {
            let config = OlsrConfig::new().with_interface(1, line_address(i));
            sim.add_node(tweak(i, config), seed.wrapping_add(i as u64))?;
        }
        for i in 1..count {
            sim.connect(Endpoint::new(i - 1, 1), Endpoint::new(i, 1));
        }
        Ok(sim)
    }

    /// Add and start a node. Returns its id.
    pub fn add_node(&mut self, config: OlsrConfig, seed: u64) -> Result<NodeId, OlsrError> {
        let mut node = OlsrNode::new(config, seed)?;
        node.start(self.now);
        let id = self.nodes.len();
        self.nodes.push(node);
        self.timers.push(None);
        self.arm_timer(id);
        Ok(id)
    }

    /// Link two interfaces. Packets broadcast on one reach the other.
    pub fn connect(&mut self, a: Endpoint, b: Endpoint) {
        self.links.insert(ordered(a, b));
    }

    /// Break a link. Returns false if it did not exist.
    pub fn disconnect(&mut self, a: Endpoint, b: Endpoint) -> bool {
        self.links.remove(&ordered(a, b))
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&OlsrNode> {
        self.nodes.get(id)
    }

    /// Mutable access for operator calls. Call [`Simulator::touch`] after
    /// changes that may produce packets or move the node's deadline.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut OlsrNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OlsrNode> {
        self.nodes.iter()
    }

    /// Pick up a node's pending output and re-arm its timer.
    pub fn touch(&mut self, id: NodeId) {
        self.collect_outgoing(id);
        self.arm_timer(id);
    }

    /// Run until the clock reaches `end`.
    pub fn run_until(&mut self, end: Time) {
        while self.queue.peek().is_some_and(|e| e.time <= end) {
            let Some(next) = self.queue.pop() else {
                break;
            };
            self.now = next.time;
            self.process(next.event);
        }
        self.now = self.now.max(end);
    }

    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.now + duration);
    }

    fn schedule(&mut self, time: Time, event: SimEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { time, seq, event });
    }

    fn process(&mut self, event: SimEvent) {
        match event {
            SimEvent::Timer { node } => {
                if self.timers[node] != Some(self.now) {
                    // Superseded by an earlier deadline.
                    return;
                }
                self.timers[node] = None;
                self.nodes[node].on_timer(self.now);
                self.touch(node);
            }
            SimEvent::Deliver { to, sender, bytes } => {
                let now = self.now;
                match self.nodes[to.node].receive(now, to.interface, sender, &bytes) {
                    Ok(()) => self.stats.packets_delivered += 1,
                    Err(e) => {
                        self.stats.receive_errors += 1;
                        trace!(node = to.node, error = %e, "delivery rejected");
                    }
                }
                self.touch(to.node);
            }
        }
    }

    /// Broadcast everything a node has queued to its linked peers.
    fn collect_outgoing(&mut self, id: NodeId) {
        let outgoing = self.nodes[id].drain_outgoing();
        for out in outgoing {
            let from = Endpoint::new(id, out.interface);
            let Some(sender) = self.nodes[id].interface_address(out.interface) else {
                continue;
            };
            self.stats.packets_sent += 1;
            let peers: Vec<Endpoint> = self.peers(from).collect();
            for to in peers {
                let at = self.now + LINK_DELAY;
                self.schedule(
                    at,
                    SimEvent::Deliver {
                        to,
                        sender,
                        bytes: out.bytes.clone(),
                    },
                );
            }
        }
    }

    fn peers(&self, from: Endpoint) -> impl Iterator<Item = Endpoint> + '_ {
        self.links.iter().filter_map(move |(a, b)| {
            if *a == from {
                Some(*b)
            } else if *b == from {
                Some(*a)
            } else {
                None
            }
        })
    }

    fn arm_timer(&mut self, id: NodeId) {
        let Some(due) = self.nodes[id].next_deadline() else {
            return;
        };
        let due = due.max(self.now);
        if self.timers[id].is_some_and(|pending| pending <= due) {
            return;
        }
        debug!(node = id, %due, "timer armed");
        self.timers[id] = Some(due);
        self.schedule(due, SimEvent::Timer { node: id });
    }
}

fn ordered(a: Endpoint, b: Endpoint) -> (Endpoint, Endpoint) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Address of node `i` in [`Simulator::line`].
pub fn line_address(i: usize) -> Ipv4Addr {
    let [_, _, hi, lo] = u32::try_from(i + 1).unwrap_or(u32::MAX).to_be_bytes();
    Ipv4Addr::new(10, 0, hi, lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn converged_line(count: usize) -> Simulator {
        let mut sim = Simulator::line(count, 11, |_, c| c).unwrap();
        sim.run_until(Time::from_secs(20));
        sim
    }

    #[test]
    fn line_of_three_routes_through_middle() {
        let sim = converged_line(3);
        let a = sim.node(0).unwrap();
        let route = a.lookup(line_address(2)).unwrap();
        assert_eq!(route.next_addr, line_address(1));
        assert_eq!(route.distance, 2);
        assert_eq!(a.mpr_set().iter().copied().collect::<Vec<_>>(), vec![line_address(1)]);

        let b = sim.node(1).unwrap();
        assert_eq!(b.lookup(line_address(0)).unwrap().distance, 1);
        assert_eq!(b.lookup(line_address(2)).unwrap().distance, 1);
        assert_eq!(sim.stats().receive_errors, 0);
    }

    #[test]
    fn line_of_five_learns_topology() {
        let sim = converged_line(5);
        let first = sim.node(0).unwrap();
        for (i, hops) in [(1, 1), (2, 2), (3, 3), (4, 4)] {
            let route = first.lookup(line_address(i)).unwrap();
            assert_eq!(route.distance, hops, "route to node {i}");
            assert_eq!(route.next_addr, line_address(1));
        }
        let last = sim.node(4).unwrap();
        assert_eq!(last.lookup(line_address(0)).unwrap().next_addr, line_address(3));
    }

    #[test]
    fn gateway_network_is_reachable() {
        let net = Ipv4Addr::new(192, 168, 7, 0);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let mut sim = Simulator::line(3, 5, |i, c| {
            if i == 2 { c.with_host_network(net, mask) } else { c }
        })
        .unwrap();
        sim.run_until(Time::from_secs(20));

        let a = sim.node(0).unwrap();
        let route = a.lookup(Ipv4Addr::new(192, 168, 7, 42)).unwrap();
        assert_eq!(route.next_addr, line_address(1));
        assert_eq!(route.distance, 2);
        assert_eq!(a.network_routes().len(), 1);
        // The gateway itself does not route to its own network.
        assert!(sim.node(2).unwrap().network_routes().is_empty());
    }

    #[test]
    fn broken_link_removes_routes() {
        let mut sim = converged_line(3);
        assert!(sim.node(0).unwrap().lookup(line_address(2)).is_some());
        sim.node_mut(0).unwrap().drain_events();

        assert!(sim.disconnect(Endpoint::new(1, 1), Endpoint::new(2, 1)));
        sim.run_for(Duration::from_secs(30));

        let a = sim.node_mut(0).unwrap();
        assert!(a.lookup(line_address(2)).is_none());
        assert!(a.lookup(line_address(1)).is_some());
        let events = a.drain_events();
        assert!(events.iter().any(|e| matches!(e, Event::RoutingTableChanged(_))));
    }

    #[test]
    fn multi_interface_node_bridges_segments() {
        let mut sim = Simulator::new();
        let a_addr = Ipv4Addr::new(10, 0, 0, 1);
        let b_main = Ipv4Addr::new(10, 0, 0, 2);
        let b_alias = Ipv4Addr::new(10, 0, 1, 2);
        let c_addr = Ipv4Addr::new(10, 0, 1, 3);
        let a = sim.add_node(OlsrConfig::new().with_interface(1, a_addr), 1).unwrap();
        let b = sim
            .add_node(
                OlsrConfig::new()
                    .with_interface(1, b_main)
                    .with_interface(2, b_alias),
                2,
            )
            .unwrap();
        let c = sim.add_node(OlsrConfig::new().with_interface(1, c_addr), 3).unwrap();
        sim.connect(Endpoint::new(a, 1), Endpoint::new(b, 1));
        sim.connect(Endpoint::new(b, 2), Endpoint::new(c, 1));
        sim.run_until(Time::from_secs(20));

        let a_node = sim.node(a).unwrap();
        let to_c = a_node.lookup(c_addr).unwrap();
        assert_eq!((to_c.next_addr, to_c.distance), (b_main, 2));
        let to_alias = a_node.lookup(b_alias).unwrap();
        assert_eq!((to_alias.next_addr, to_alias.distance), (b_main, 1));

        let c_node = sim.node(c).unwrap();
        assert_eq!(c_node.lookup(a_addr).unwrap().next_addr, b_alias);
    }

    #[test]
    fn interface_down_isolates_node() {
        let mut sim = converged_line(3);
        sim.node_mut(1).unwrap().notify_interface_down(1).unwrap();
        sim.touch(1);
        assert!(sim.node(1).unwrap().routing_table_entries().is_empty());
        sim.run_for(Duration::from_secs(30));
        assert!(sim.node(0).unwrap().routing_table_entries().is_empty());
        assert!(sim.stats().receive_errors > 0);
    }
}
