//! Topology discovery and duplicate control.
//!
//! TC, MID and HNA messages are only accepted from a sender reached over a
//! symmetric link. Every processed non-HELLO message leaves a duplicate
//! tuple behind, and is retransmitted once when the sender selected this
//! node as MPR (RFC 3626 §3.4.1 default forwarding).

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, trace};

use crate::message::{Hna, Message, Mid, Tc};
use crate::repository::{
    AssociationTuple, DuplicateTuple, IfaceAssocTuple, OlsrState, TopologyTuple,
};
use crate::time::Time;

/// Context of one received message.
#[derive(Debug, Clone, Copy)]
pub struct Receipt {
    pub now: Time,
    /// Local interface address the message arrived on.
    pub local_iface: Ipv4Addr,
    /// Interface address of the neighbor that transmitted the packet.
    pub sender_iface: Ipv4Addr,
    pub originator: Ipv4Addr,
    pub vtime: Duration,
}

impl Receipt {
    pub fn for_message(
        now: Time,
        local_iface: Ipv4Addr,
        sender_iface: Ipv4Addr,
        msg: &Message,
    ) -> Self {
        Receipt {
            now,
            local_iface,
            sender_iface,
            originator: msg.originator,
            vtime: msg.vtime(),
        }
    }

    fn expiration(&self) -> Time {
        self.now + self.vtime
    }

    fn from_symmetric_neighbor(&self, state: &OlsrState) -> bool {
        state.find_sym_link_tuple(self.sender_iface, self.now).is_some()
    }
}

/// Apply a TC. Returns true if the Topology Set gained or lost tuples.
pub fn process_tc(state: &mut OlsrState, tc: &Tc, rx: &Receipt) -> bool {
    if !rx.from_symmetric_neighbor(state) {
        trace!(sender = %rx.sender_iface, "TC from non-symmetric neighbor ignored");
        return false;
    }
    if state.find_newer_topology_tuple(rx.originator, tc.ansn).is_some() {
        debug!(originator = %rx.originator, ansn = tc.ansn, "stale TC discarded");
        return false;
    }

    let mut changed = state.erase_older_topology_tuples(rx.originator, tc.ansn) > 0;
    let expiration_time = rx.expiration();
    for dest in &tc.neighbor_addresses {
        match state.find_topology_tuple_mut(*dest, rx.originator) {
            Some(tuple) => {
                tuple.sequence_number = tc.ansn;
                tuple.expiration_time = expiration_time;
            }
            None => {
                state.insert_topology_tuple(TopologyTuple {
                    dest_addr: *dest,
                    last_addr: rx.originator,
                    sequence_number: tc.ansn,
                    expiration_time,
                });
                changed = true;
            }
        }
    }
    changed
}

/// Apply a MID. Returns true if a new interface alias was learned.
pub fn process_mid(state: &mut OlsrState, mid: &Mid, rx: &Receipt) -> bool {
    if !rx.from_symmetric_neighbor(state) {
        trace!(sender = %rx.sender_iface, "MID from non-symmetric neighbor ignored");
        return false;
    }

    let mut changed = false;
    let time = rx.expiration();
    for iface in &mid.interface_addresses {
        match state.find_iface_assoc_tuple_mut(*iface) {
            Some(tuple) if tuple.main_addr == rx.originator => tuple.time = time,
            _ => {
                state.insert_iface_assoc_tuple(IfaceAssocTuple {
                    iface_addr: *iface,
                    main_addr: rx.originator,
                    time,
                });
                changed = true;
            }
        }
        changed |= state.alias_main_address(*iface, rx.originator);
    }
    if changed {
        debug!(
            originator = %rx.originator,
            ifaces = ?mid.interface_addresses,
            "interface association updated"
        );
    }
    changed
}

/// Apply an HNA. Returns true if a new network association was learned.
pub fn process_hna(state: &mut OlsrState, hna: &Hna, rx: &Receipt) -> bool {
    if !rx.from_symmetric_neighbor(state) {
        trace!(sender = %rx.sender_iface, "HNA from non-symmetric neighbor ignored");
        return false;
    }

    let mut changed = false;
    let expiration_time = rx.expiration();
    for assoc in &hna.associations {
        match state.find_association_tuple_mut(rx.originator, assoc.address, assoc.mask) {
            Some(tuple) => tuple.expiration_time = expiration_time,
            None => {
                state.insert_association_tuple(AssociationTuple {
                    gateway_addr: rx.originator,
                    network_addr: assoc.address,
                    netmask: assoc.mask,
                    expiration_time,
                });
                changed = true;
            }
        }
    }
    changed
}

/// Whether `msg` was already received on `local_iface`, in which case it is
/// neither processed nor considered for forwarding again.
pub fn seen_on(state: &OlsrState, msg: &Message, local_iface: Ipv4Addr) -> bool {
    state
        .find_duplicate_tuple(msg.originator, msg.sequence_number)
        .is_some_and(|d| d.iface_list.contains(&local_iface))
}

/// Record `msg` in the Duplicate Set and decide whether to retransmit it.
///
/// Returns the message to queue, with TTL decremented and hop count
/// incremented, when the sender is a symmetric neighbor that selected this
/// node as MPR and the message has TTL left and has not been relayed yet.
pub fn forward_default(
    state: &mut OlsrState,
    msg: &Message,
    rx: &Receipt,
    dup_hold: Duration,
) -> Option<Message> {
    let retransmitted = state
        .find_duplicate_tuple(msg.originator, msg.sequence_number)
        .is_some_and(|d| d.retransmitted);
    let selector = state.main_address(rx.sender_iface);

    let forward = rx.from_symmetric_neighbor(state)
        && !retransmitted
        && msg.time_to_live > 1
        && state.find_mpr_selector_tuple(selector).is_some();
    let relayed = forward.then(|| {
        let mut out = msg.clone();
        out.time_to_live -= 1;
        out.hop_count = out.hop_count.saturating_add(1);
        out
    });

    let expiration_time = rx.now + dup_hold;
    match state.find_duplicate_tuple_mut(msg.originator, msg.sequence_number) {
        Some(dup) => {
            dup.expiration_time = expiration_time;
            dup.retransmitted |= forward;
            if !dup.iface_list.contains(&rx.local_iface) {
                dup.iface_list.push(rx.local_iface);
            }
        }
        None => state.insert_duplicate_tuple(DuplicateTuple {
            address: msg.originator,
            sequence_number: msg.sequence_number,
            retransmitted: forward,
            iface_list: vec![rx.local_iface],
            expiration_time,
        }),
    }

    if forward {
        trace!(
            originator = %msg.originator,
            seq = msg.sequence_number,
            ttl = msg.time_to_live,
            "relaying message"
        );
    }
    relayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HnaAssociation, MessageBody};
    use crate::repository::{LinkTuple, MprSelectorTuple};

    const HOLD: Duration = Duration::from_secs(15);

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn symmetric_state(now: Time) -> OlsrState {
        let mut state = OlsrState::new();
        state.insert_link_tuple(LinkTuple {
            local_iface_addr: ip(1),
            neighbor_iface_addr: ip(2),
            sym_time: now + HOLD,
            asym_time: now + HOLD,
            time: now + HOLD,
        });
        state
    }

    fn rx(now: Time, originator: Ipv4Addr) -> Receipt {
        Receipt {
            now,
            local_iface: ip(1),
            sender_iface: ip(2),
            originator,
            vtime: HOLD,
        }
    }

    fn tc(ansn: u16, addrs: &[u8]) -> Tc {
        Tc {
            ansn,
            neighbor_addresses: addrs.iter().map(|a| ip(*a)).collect(),
        }
    }

    fn dests(state: &OlsrState) -> Vec<(Ipv4Addr, u16)> {
        state
            .topology_set()
            .map(|t| (t.dest_addr, t.sequence_number))
            .collect()
    }

    #[test]
    fn tc_requires_symmetric_sender() {
        let now = Time::from_secs(1);
        let mut state = OlsrState::new();
        assert!(!process_tc(&mut state, &tc(1, &[3]), &rx(now, ip(2))));
        assert_eq!(state.topology_set().count(), 0);
    }

    #[test]
    fn tc_ansn_ordering() {
        let now = Time::from_secs(1);
        let mut state = symmetric_state(now);
        let origin = ip(9);

        assert!(process_tc(&mut state, &tc(5, &[3, 4]), &rx(now, origin)));
        assert_eq!(dests(&state), vec![(ip(3), 5), (ip(4), 5)]);

        // Older ANSN is discarded.
        assert!(!process_tc(&mut state, &tc(4, &[7]), &rx(now, origin)));
        assert_eq!(state.topology_set().count(), 2);

        // Equal ANSN refreshes.
        let later = now + Duration::from_secs(2);
        assert!(!process_tc(&mut state, &tc(5, &[3]), &rx(later, origin)));
        assert_eq!(
            state.find_topology_tuple(ip(3), origin).unwrap().expiration_time,
            later + HOLD
        );

        // Newer ANSN replaces what was advertised before.
        assert!(process_tc(&mut state, &tc(6, &[7]), &rx(later, origin)));
        assert_eq!(dests(&state), vec![(ip(7), 6)]);
    }

    #[test]
    fn tc_ansn_wraps() {
        let now = Time::from_secs(1);
        let mut state = symmetric_state(now);
        process_tc(&mut state, &tc(u16::MAX, &[3]), &rx(now, ip(9)));
        assert!(process_tc(&mut state, &tc(0, &[4]), &rx(now, ip(9))));
        assert_eq!(dests(&state), vec![(ip(4), 0)]);
    }

    #[test]
    fn mid_aliases_interfaces() {
        let now = Time::from_secs(1);
        let mut state = symmetric_state(now);
        let mid = Mid {
            interface_addresses: vec![Ipv4Addr::new(10, 1, 0, 9)],
        };
        assert!(process_mid(&mut state, &mid, &rx(now, ip(9))));
        assert_eq!(state.main_address(Ipv4Addr::new(10, 1, 0, 9)), ip(9));
        assert!(!process_mid(&mut state, &mid, &rx(now, ip(9))));
    }

    #[test]
    fn hna_learns_associations() {
        let now = Time::from_secs(1);
        let mut state = symmetric_state(now);
        let hna = Hna {
            associations: vec![HnaAssociation {
                address: Ipv4Addr::new(192, 168, 1, 0),
                mask: Ipv4Addr::new(255, 255, 255, 0),
            }],
        };
        assert!(process_hna(&mut state, &hna, &rx(now, ip(9))));
        assert!(!process_hna(&mut state, &hna, &rx(now, ip(9))));
        let tuple = state.association_set().next().unwrap();
        assert_eq!(tuple.gateway_addr, ip(9));
        assert_eq!(tuple.expiration_time, now + HOLD);
    }

    fn tc_message(ttl: u8) -> Message {
        Message::new(ip(9), 42, HOLD, ttl, MessageBody::Tc(tc(1, &[3])))
    }

    #[test]
    fn relays_for_mpr_selector_once() {
        let now = Time::from_secs(1);
        let mut state = symmetric_state(now);
        state.insert_mpr_selector_tuple(MprSelectorTuple {
            main_addr: ip(2),
            expiration_time: now + HOLD,
        });
        let msg = tc_message(255);
        let r = rx(now, msg.originator);

        let out = forward_default(&mut state, &msg, &r, Duration::from_secs(30)).unwrap();
        assert_eq!(out.time_to_live, 254);
        assert_eq!(out.hop_count, 1);
        assert!(seen_on(&state, &msg, ip(1)));

        let dup = state.find_duplicate_tuple(ip(9), 42).unwrap();
        assert!(dup.retransmitted);
        assert_eq!(dup.expiration_time, now + Duration::from_secs(30));

        let other_iface = Receipt {
            local_iface: ip(100),
            ..r
        };
        assert!(forward_default(&mut state, &msg, &other_iface, Duration::from_secs(30)).is_none());
        let dup = state.find_duplicate_tuple(ip(9), 42).unwrap();
        assert_eq!(dup.iface_list, vec![ip(1), ip(100)]);
    }

    #[test]
    fn no_relay_without_selection_or_ttl() {
        let now = Time::from_secs(1);
        let mut state = symmetric_state(now);
        let msg = tc_message(255);
        assert!(forward_default(&mut state, &msg, &rx(now, msg.originator), HOLD).is_none());
        assert!(!state.find_duplicate_tuple(ip(9), 42).unwrap().retransmitted);

        state.insert_mpr_selector_tuple(MprSelectorTuple {
            main_addr: ip(2),
            expiration_time: now + HOLD,
        });
        let last_hop = Message {
            sequence_number: 43,
            ..tc_message(1)
        };
        assert!(forward_default(&mut state, &last_hop, &rx(now, last_hop.originator), HOLD).is_none());
    }

    #[test]
    fn duplicate_recorded_from_non_symmetric_sender() {
        let now = Time::from_secs(1);
        let mut state = OlsrState::new();
        let msg = tc_message(255);
        assert!(forward_default(&mut state, &msg, &rx(now, msg.originator), HOLD).is_none());
        assert!(seen_on(&state, &msg, ip(1)));
    }
}
