//! Capacity-graph snapshot and modified Yen's k-shortest-paths routing.

use crate::error::HubError;
use crate::ledger_store::LedgerStore;
use crate::types::{RouteConstraints, RoutedPath};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Directed capacity graph for one equivalent, built at request time. Edge
/// `to -> from` exists for every active trust line `from -> to`, with
/// capacity equal to the remaining headroom on the creditor's limit net of
/// outstanding debt and pending reservations.
#[derive(Debug, Clone, Default)]
pub struct CapacitySnapshot {
    adjacency: BTreeMap<String, Vec<(String, Decimal)>>,
}

impl CapacitySnapshot {
    pub fn neighbors(&self, node: &str) -> &[(String, Decimal)] {
        self.adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn edge_capacity(&self, from: &str, to: &str) -> Option<Decimal> {
        self.neighbors(from)
            .iter()
            .find(|(n, _)| n == to)
            .map(|(_, c)| *c)
    }
}

/// Build the capacity snapshot for a payment from `source` to `target` in
/// `equivalent`. Edges whose counterparty is blocked, whose endpoints are
/// non-active, or that would be used as an intermediate hop while their
/// policy's `can_be_intermediate` is false are omitted entirely. A trust
/// line directly connecting `source` and `target` never needs
/// `can_be_intermediate`; any other line does, since some node on it other
/// than `source`/`target` would be used as a pass-through.
pub async fn build_capacity_snapshot(
    store: &LedgerStore,
    equivalent: &str,
    source: &str,
    target: &str,
    avoid: &HashSet<String>,
) -> Result<CapacitySnapshot, HubError> {
    let mut snapshot = CapacitySnapshot::default();
    let lines = store.list_trust_lines(equivalent).await?;
    let now = Utc::now();

    for line in lines {
        if !line.is_active() {
            continue;
        }
        if avoid.contains(&line.from) || avoid.contains(&line.to) {
            continue;
        }
        if line.policy.blocked_participants.contains(&line.to)
            || line.policy.blocked_participants.contains(&line.from)
        {
            continue;
        }
        let is_direct_edge = (line.from == source && line.to == target)
            || (line.from == target && line.to == source);
        if !is_direct_edge && !line.policy.can_be_intermediate {
            continue;
        }
        let from_p = store.get_participant(&line.from).await?;
        let to_p = store.get_participant(&line.to).await?;
        if !from_p.map(|p| p.is_active()).unwrap_or(false) {
            continue;
        }
        if !to_p.map(|p| p.is_active()).unwrap_or(false) {
            continue;
        }

        let debt = store
            .get_debt(&line.to, &line.from, equivalent)
            .await?
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO);
        let reserved = store
            .reserved_on_segment(equivalent, &line.to, &line.from, None, now)
            .await?;
        let available = (line.limit - debt - reserved).max(Decimal::ZERO);
        if available > Decimal::ZERO {
            snapshot
                .adjacency
                .entry(line.to.clone())
                .or_default()
                .push((line.from.clone(), available));
        }
    }

    Ok(snapshot)
}

/// Widest path (max-bottleneck) search via a Dijkstra-like relaxation,
/// bounded by `max_hops`.
fn widest_path(
    graph: &CapacitySnapshot,
    source: &str,
    target: &str,
    max_hops: usize,
    forbidden_edges: &HashSet<(String, String)>,
    forced_prefix: &[String],
) -> Option<(Vec<String>, Decimal)> {
    // best[node] = (bottleneck so far, predecessor)
    let mut best: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut pred: BTreeMap<String, String> = BTreeMap::new();
    let mut queue: VecDeque<(String, Decimal, usize)> = VecDeque::new();

    let start_bottleneck = if forced_prefix.len() >= 2 {
        // bottleneck already constrained by the forced prefix's own edges
        Decimal::MAX
    } else {
        Decimal::MAX
    };
    best.insert(source.to_string(), start_bottleneck);
    queue.push_back((source.to_string(), start_bottleneck, forced_prefix.len().saturating_sub(1)));

    while let Some((node, bottleneck, hops)) = queue.pop_front() {
        if hops >= max_hops {
            continue;
        }
        if best.get(&node).copied().unwrap_or(Decimal::ZERO) > bottleneck {
            continue;
        }
        for (next, capacity) in graph.neighbors(&node) {
            if forbidden_edges.contains(&(node.clone(), next.clone())) {
                continue;
            }
            if next == source {
                continue;
            }
            let candidate = bottleneck.min(*capacity);
            if candidate <= Decimal::ZERO {
                continue;
            }
            let improves = best
                .get(next)
                .map(|existing| candidate > *existing)
                .unwrap_or(true);
            if improves {
                best.insert(next.clone(), candidate);
                pred.insert(next.clone(), node.clone());
                queue.push_back((next.clone(), candidate, hops + 1));
            }
        }
    }

    if !best.contains_key(target) {
        return None;
    }

    let mut path = vec![target.to_string()];
    let mut cursor = target.to_string();
    while cursor != source {
        let prev = pred.get(&cursor)?;
        path.push(prev.clone());
        cursor = prev.clone();
    }
    path.reverse();

    let mut full_path = forced_prefix.to_vec();
    if !full_path.is_empty() {
        full_path.pop();
    }
    full_path.extend(path);

    Some((full_path, *best.get(target).unwrap()))
}

fn path_bottleneck(graph: &CapacitySnapshot, nodes: &[String]) -> Decimal {
    let mut bottleneck = Decimal::MAX;
    for pair in nodes.windows(2) {
        match graph.edge_capacity(&pair[0], &pair[1]) {
            Some(c) => bottleneck = bottleneck.min(c),
            None => return Decimal::ZERO,
        }
    }
    bottleneck
}

/// Enumerate up to `constraints.max_paths` candidate paths via a modified
/// Yen's algorithm: the first path is the pure widest path, subsequent
/// paths are found by excluding one edge of each previously found path at a
/// spur node and re-searching.
pub fn k_shortest_paths(
    graph: &CapacitySnapshot,
    source: &str,
    target: &str,
    constraints: &RouteConstraints,
) -> Vec<(Vec<String>, Decimal)> {
    let mut found: Vec<(Vec<String>, Decimal)> = Vec::new();
    let mut candidates: Vec<(Vec<String>, Decimal)> = Vec::new();

    let empty_forbidden = HashSet::new();
    if let Some(first) = widest_path(graph, source, target, constraints.max_hops, &empty_forbidden, &[]) {
        found.push(first);
    }

    while found.len() < constraints.max_paths {
        let last = match found.last() {
            Some(p) => p.0.clone(),
            None => break,
        };

        let mut best_candidate: Option<(Vec<String>, Decimal)> = None;
        for spur_index in 0..last.len().saturating_sub(1) {
            let spur_node = &last[spur_index];
            let root_path = &last[..=spur_index];

            let mut forbidden_edges: HashSet<(String, String)> = HashSet::new();
            for (path, _) in found.iter().chain(candidates.iter()) {
                if path.len() > spur_index && path[..=spur_index] == last[..=spur_index] {
                    if spur_index + 1 < path.len() {
                        forbidden_edges.insert((path[spur_index].clone(), path[spur_index + 1].clone()));
                    }
                }
            }

            if let Some((spur_path, _)) = widest_path(
                graph,
                spur_node,
                target,
                constraints.max_hops.saturating_sub(spur_index),
                &forbidden_edges,
                root_path,
            ) {
                let bottleneck = path_bottleneck(graph, &spur_path);
                if bottleneck > Decimal::ZERO
                    && !found.iter().any(|(p, _)| *p == spur_path)
                    && !candidates.iter().any(|(p, _)| *p == spur_path)
                {
                    candidates.push((spur_path.clone(), bottleneck));
                    if best_candidate
                        .as_ref()
                        .map(|(_, b)| bottleneck > *b)
                        .unwrap_or(true)
                    {
                        best_candidate = Some((spur_path, bottleneck));
                    }
                }
            }
        }

        match candidates
            .iter()
            .enumerate()
            .max_by_key(|(_, (_, b))| *b)
            .map(|(i, _)| i)
        {
            Some(idx) => {
                let picked = candidates.remove(idx);
                found.push(picked);
            }
            None => break,
        }
    }

    found
        .into_iter()
        .filter(|(path, _)| path.len() - 1 <= constraints.max_hops)
        .collect()
}

/// Split `amount` across candidate paths sorted by capacity descending,
/// assigning `min(remaining, capacity)` to each until covered.
pub fn split_amount(
    candidates: Vec<(Vec<String>, Decimal)>,
    amount: Decimal,
) -> Result<Vec<RoutedPath>, HubError> {
    let mut sorted = candidates;
    sorted.sort_by(|a, b| b.1.cmp(&a.1));

    let mut remaining = amount;
    let mut routes = Vec::new();
    for (nodes, capacity) in sorted {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(capacity);
        if take <= Decimal::ZERO {
            continue;
        }
        routes.push(RoutedPath {
            nodes,
            amount: take,
        });
        remaining -= take;
    }

    if remaining > Decimal::ZERO {
        let routable = amount - remaining;
        return Err(HubError::InsufficientCapacity {
            requested: amount,
            routable,
        });
    }

    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(edges: &[(&str, &str, i64)]) -> CapacitySnapshot {
        let mut s = CapacitySnapshot::default();
        for (from, to, cap) in edges {
            s.adjacency
                .entry(from.to_string())
                .or_default()
                .push((to.to_string(), Decimal::new(*cap, 0)));
        }
        s
    }

    #[test]
    fn widest_path_finds_direct_edge() {
        let g = snapshot(&[("a", "b", 100)]);
        let constraints = RouteConstraints::default();
        let found = k_shortest_paths(&g, "a", "b", &constraints);
        assert_eq!(found[0].0, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(found[0].1, Decimal::new(100, 0));
    }

    #[test]
    fn widest_path_prefers_bottleneck_capacity() {
        let g = snapshot(&[("a", "b", 500), ("b", "c", 500), ("a", "x", 50), ("x", "c", 1000)]);
        let constraints = RouteConstraints::default();
        let found = k_shortest_paths(&g, "a", "c", &constraints);
        assert_eq!(found[0].1, Decimal::new(500, 0));
    }

    #[test]
    fn split_amount_covers_request_across_paths() {
        let candidates = vec![
            (vec!["a".into(), "b".into()], Decimal::new(80, 0)),
            (vec!["a".into(), "c".into(), "b".into()], Decimal::new(100, 0)),
        ];
        let routes = split_amount(candidates, Decimal::new(150, 0)).unwrap();
        let total: Decimal = routes.iter().map(|r| r.amount).sum();
        assert_eq!(total, Decimal::new(150, 0));
    }

    #[test]
    fn split_amount_fails_when_undercovered() {
        let candidates = vec![(vec!["a".into(), "b".into()], Decimal::new(50, 0))];
        let err = split_amount(candidates, Decimal::new(100, 0)).unwrap_err();
        assert!(matches!(err, HubError::InsufficientCapacity { .. }));
    }
}
