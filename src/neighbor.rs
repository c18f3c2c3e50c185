// src/neighbor.rs
//! Link sensing and neighbor discovery for an OLSR node.
//!
//! This module handles:
//! - Maintaining the Link Set from received HELLOs (RFC 3626 §7.1.1)
//! - Deriving neighbor status from the links (§8.1)
//! - Populating the 2-hop Neighbor Set (§8.2.1)
//! - Recording which neighbors selected this node as MPR (§8.4.1)
//! - Reconciling neighbors after links expire
//!
//! It sits between the codec and MPR/route computation; every function
//! takes the repository explicitly and mutates it synchronously.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, trace};

use crate::message::{Hello, LinkType, NeighborType, Willingness};
use crate::repository::{
    LinkTuple, MprSelectorTuple, NeighborStatus, NeighborTuple, OlsrState, TwoHopNeighborTuple,
};
use crate::time::Time;

/// Context of one received HELLO.
#[derive(Debug, Clone, Copy)]
pub struct HelloReceipt<'a> {
    pub now: Time,
    /// Local interface address the HELLO arrived on.
    pub receiver_iface: Ipv4Addr,
    /// Interface address of the sender.
    pub sender_iface: Ipv4Addr,
    pub originator: Ipv4Addr,
    /// Validity time carried in the message header.
    pub vtime: Duration,
    pub neighbor_hold: Duration,
    pub main_addr: Ipv4Addr,
    pub local_addrs: &'a BTreeSet<Ipv4Addr>,
}

impl HelloReceipt<'_> {
    fn is_local(&self, addr: Ipv4Addr) -> bool {
        addr == self.main_addr || self.local_addrs.contains(&addr)
    }
}

/// A neighbor tuple appearing, disappearing or changing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborChange {
    pub addr: Ipv4Addr,
    pub before: Option<NeighborStatus>,
    pub after: Option<NeighborStatus>,
}

impl NeighborChange {
    /// The neighbor was symmetric and no longer is.
    pub fn lost_symmetry(&self) -> bool {
        self.before == Some(NeighborStatus::Sym) && self.after != Some(NeighborStatus::Sym)
    }
}

/// Update the Link Set from a HELLO. Returns true if a new link was created.
pub fn link_sensing(state: &mut OlsrState, hello: &Hello, rx: &HelloReceipt<'_>) -> bool {
    let now = rx.now;
    let (link, created) =
        state.find_or_insert_link_tuple(rx.receiver_iface, rx.sender_iface, || LinkTuple {
            local_iface_addr: rx.receiver_iface,
            neighbor_iface_addr: rx.sender_iface,
            sym_time: now - Duration::from_secs(1),
            asym_time: now,
            time: now + rx.vtime,
        });

    link.asym_time = now + rx.vtime;
    for lm in hello.link_messages.iter().filter(|lm| lm.is_valid()) {
        if !lm.neighbor_interface_addresses.contains(&rx.receiver_iface) {
            continue;
        }
        match lm.link_type() {
            LinkType::Lost => {
                link.sym_time = now - Duration::from_secs(1);
            }
            LinkType::Sym | LinkType::Asym => {
                link.sym_time = now + rx.vtime;
                link.time = link.sym_time + rx.neighbor_hold;
            }
            LinkType::Unspec => {}
        }
    }
    link.time = link.time.max(link.asym_time);

    trace!(
        local = %rx.receiver_iface,
        neighbor = %rx.sender_iface,
        symmetric = link.is_symmetric(now),
        created,
        "link sensed"
    );
    created
}

/// Whether some valid link leads to the node with main address `main_addr`,
/// and whether one of them is symmetric.
fn link_status(state: &OlsrState, main_addr: Ipv4Addr, now: Time) -> (bool, bool) {
    let mut valid = false;
    let mut symmetric = false;
    for link in state.links() {
        if state.main_address(link.neighbor_iface_addr) != main_addr || !link.is_valid(now) {
            continue;
        }
        valid = true;
        symmetric |= link.is_symmetric(now);
    }
    (valid, symmetric)
}

/// Bring the neighbor tuple of `main_addr` in line with its links.
///
/// Creates the tuple if a link exists but no tuple does (using
/// `willingness`, or the default), removes it when no link is left, and
/// on loss of symmetry drops the 2-hop and MPR-selector tuples that
/// depended on it.
pub fn update_neighbor_status(
    state: &mut OlsrState,
    main_addr: Ipv4Addr,
    willingness: Option<Willingness>,
    now: Time,
) -> Option<NeighborChange> {
    let (valid, symmetric) = link_status(state, main_addr, now);
    let status = if symmetric {
        NeighborStatus::Sym
    } else {
        NeighborStatus::NotSym
    };

    let before = state.find_neighbor_tuple(main_addr).map(|n| n.status);
    let after = if valid { Some(status) } else { None };

    match (before, after) {
        (None, None) => return None,
        (None, Some(status)) => state.insert_neighbor_tuple(NeighborTuple {
            neighbor_main_addr: main_addr,
            status,
            willingness: willingness.unwrap_or_default(),
        }),
        (Some(_), None) => {
            state.erase_neighbor_tuple(main_addr);
        }
        (Some(_), Some(status)) => {
            if let Some(nb) = state.find_neighbor_tuple_mut(main_addr) {
                nb.status = status;
            }
        }
    }

    if before == after {
        return None;
    }

    let change = NeighborChange {
        addr: main_addr,
        before,
        after,
    };
    if change.lost_symmetry() || after.is_none() {
        let two_hops = state.erase_two_hop_neighbor_tuples(main_addr);
        let selector = state.erase_mpr_selector_tuple(main_addr).is_some();
        debug!(
            neighbor = %main_addr,
            two_hops,
            selector,
            "neighbor lost symmetric link"
        );
    }
    Some(change)
}

/// Record the advertised willingness of the HELLO's originator.
pub fn populate_neighbor_set(state: &mut OlsrState, originator: Ipv4Addr, willingness: Willingness) {
    if let Some(nb) = state.find_neighbor_tuple_mut(originator) {
        nb.willingness = willingness;
    }
}

/// Update the 2-hop Neighbor Set from a HELLO. Returns true if tuples were
/// added or removed.
pub fn populate_two_hop_neighbor_set(
    state: &mut OlsrState,
    hello: &Hello,
    rx: &HelloReceipt<'_>,
) -> bool {
    let now = rx.now;
    let originator = rx.originator;
    let sym_link = state
        .links()
        .any(|l| l.is_symmetric(now) && state.main_address(l.neighbor_iface_addr) == originator);
    if !sym_link {
        return false;
    }

    let expiration_time = now + rx.vtime;
    let mut changed = false;
    for lm in hello.link_messages.iter().filter(|lm| lm.is_valid()) {
        let neighbor_type = lm.neighbor_type();
        for addr in &lm.neighbor_interface_addresses {
            let two_hop = state.main_address(*addr);
            match neighbor_type {
                Some(NeighborType::Sym) | Some(NeighborType::Mpr) => {
                    if rx.is_local(two_hop) || two_hop == originator {
                        continue;
                    }
                    match state.find_two_hop_neighbor_tuple_mut(originator, two_hop) {
                        Some(tuple) => tuple.expiration_time = expiration_time,
                        None => {
                            state.insert_two_hop_neighbor_tuple(TwoHopNeighborTuple {
                                neighbor_main_addr: originator,
                                two_hop_neighbor_addr: two_hop,
                                expiration_time,
                            });
                            changed = true;
                        }
                    }
                }
                Some(NeighborType::Not) => {
                    changed |= state
                        .erase_two_hop_neighbor_tuple(originator, two_hop)
                        .is_some();
                }
                None => {}
            }
        }
    }
    changed
}

/// Record the originator as an MPR selector if the HELLO lists this node
/// with neighbor type MPR. Returns true if a new selector was added.
pub fn populate_mpr_selector_set(
    state: &mut OlsrState,
    hello: &Hello,
    rx: &HelloReceipt<'_>,
) -> bool {
    let selected = hello
        .link_messages
        .iter()
        .filter(|lm| lm.is_valid() && lm.neighbor_type() == Some(NeighborType::Mpr))
        .flat_map(|lm| lm.neighbor_interface_addresses.iter())
        .any(|addr| rx.is_local(*addr));
    if !selected {
        return false;
    }

    let expiration_time = rx.now + rx.vtime;
    match state.find_mpr_selector_tuple_mut(rx.originator) {
        Some(tuple) => {
            tuple.expiration_time = expiration_time;
            false
        }
        None => {
            state.insert_mpr_selector_tuple(MprSelectorTuple {
                main_addr: rx.originator,
                expiration_time,
            });
            debug!(selector = %rx.originator, "new MPR selector");
            true
        }
    }
}

/// Re-derive every neighbor tuple from the current Link Set, e.g. after an
/// expiry sweep removed links or let symmetric times lapse.
pub fn reconcile_neighbors(state: &mut OlsrState, now: Time) -> Vec<NeighborChange> {
    let mut addrs: BTreeSet<Ipv4Addr> = state.neighbors().map(|n| n.neighbor_main_addr).collect();
    let linked: Vec<Ipv4Addr> = state
        .links()
        .filter(|l| l.is_valid(now))
        .map(|l| state.main_address(l.neighbor_iface_addr))
        .collect();
    addrs.extend(linked);

    addrs
        .into_iter()
        .filter_map(|addr| update_neighbor_status(state, addr, None, now))
        .collect()
}
