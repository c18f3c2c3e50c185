// src/event.rs
//! High-level events emitted by an OLSR node.
//!
//! This allows applications to react to neighbor / MPR / route changes
//! without constantly polling and diffing internal state.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::routing::RoutingTableEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A neighbor was heard for the first time.
    NeighborUp(Ipv4Addr),

    /// The link to a neighbor became symmetric.
    NeighborSymmetric(Ipv4Addr),

    /// A symmetric neighbor is no longer symmetric.
    NeighborLost(Ipv4Addr),

    /// A neighbor was removed because no link to it is left.
    NeighborDown(Ipv4Addr),

    /// The locally computed MPR set changed.
    MprSetChanged(BTreeSet<Ipv4Addr>),

    /// The routing table was recomputed and differs from the previous one.
    RoutingTableChanged(Vec<RoutingTableEntry>),
}
