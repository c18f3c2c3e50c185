//! Multipoint relay selection (RFC 3626 §8.3.1).
//!
//! The MPR set is the subset of symmetric 1-hop neighbors through which
//! every strict 2-hop neighbor can be reached. Selection is greedy:
//! neighbors with willingness ALWAYS first, then sole coverers of some
//! 2-hop node, then repeatedly the candidate ranked highest by
//! (willingness, reachability, degree), lowest address breaking ties.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use tracing::trace;

use crate::message::Willingness;
use crate::repository::OlsrState;

/// Compute a fresh MPR set from the neighbor and 2-hop neighbor sets.
///
/// `local_addrs` are this node's own interface addresses, which never count
/// as 2-hop neighbors.
pub fn compute_mpr_set(state: &OlsrState, local_addrs: &BTreeSet<Ipv4Addr>) -> BTreeSet<Ipv4Addr> {
    let symmetric: BTreeMap<Ipv4Addr, Willingness> = state
        .neighbors()
        .filter(|n| n.is_symmetric())
        .map(|n| (n.neighbor_main_addr, n.willingness))
        .collect();
    let candidates: BTreeMap<Ipv4Addr, Willingness> = symmetric
        .iter()
        .filter(|(_, w)| **w != Willingness::NEVER)
        .map(|(a, w)| (*a, *w))
        .collect();

    // Neighbor -> strict 2-hop neighbors it reaches.
    let mut covers: BTreeMap<Ipv4Addr, BTreeSet<Ipv4Addr>> = BTreeMap::new();
    for t in state.two_hop_neighbors() {
        let two_hop = t.two_hop_neighbor_addr;
        if !candidates.contains_key(&t.neighbor_main_addr)
            || local_addrs.contains(&two_hop)
            || symmetric.contains_key(&two_hop)
        {
            continue;
        }
        covers
            .entry(t.neighbor_main_addr)
            .or_default()
            .insert(two_hop);
    }

    let mut uncovered: BTreeSet<Ipv4Addr> = covers.values().flatten().copied().collect();
    let mut mprs = BTreeSet::new();

    let select = |addr: Ipv4Addr, mprs: &mut BTreeSet<Ipv4Addr>, uncovered: &mut BTreeSet<Ipv4Addr>| {
        if mprs.insert(addr) {
            if let Some(reached) = covers.get(&addr) {
                uncovered.retain(|t| !reached.contains(t));
            }
        }
    };

    for (addr, willingness) in &candidates {
        if *willingness == Willingness::ALWAYS {
            select(*addr, &mut mprs, &mut uncovered);
        }
    }

    let sole: Vec<Ipv4Addr> = uncovered
        .iter()
        .filter_map(|t| {
            let mut via = covers.iter().filter(|(_, reached)| reached.contains(t));
            match (via.next(), via.next()) {
                (Some((n, _)), None) => Some(*n),
                _ => None,
            }
        })
        .collect();
    for addr in sole {
        select(addr, &mut mprs, &mut uncovered);
    }

    while !uncovered.is_empty() {
        let best = covers
            .iter()
            .filter(|(n, _)| !mprs.contains(*n))
            .filter_map(|(n, reached)| {
                let reachability = reached.intersection(&uncovered).count();
                if reachability == 0 {
                    return None;
                }
                let willingness = candidates.get(n).copied().unwrap_or_default();
                Some(((willingness, reachability, reached.len(), Reverse(*n)), *n))
            })
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, n)| n);

        let Some(addr) = best else { break };
        select(addr, &mut mprs, &mut uncovered);
    }

    trace!(mprs = ?mprs, "computed MPR set");
    mprs
}
