//! A from-scratch Cuckoo Cycle solver/verifier (spec.md §4.B PoW rule).
//! Edge generation is keyed on BLAKE2b rather than siphash — this workspace
//! already carries `blake2` for every other hash, and nothing else here
//! needs siphash's speed profile. Small `edge_bits`/`cycle_len` keep the
//! CPU search tractable; `mainnet()` documents the real-scale constants but
//! is never exercised by a test.

use hns_chain::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuckooParams {
    pub edge_bits: u8,
    pub cycle_len: usize,
}

impl CuckooParams {
    pub const fn mainnet() -> Self {
        CuckooParams {
            edge_bits: 30,
            cycle_len: 42,
        }
    }

    pub const fn regtest() -> Self {
        CuckooParams {
            edge_bits: 8,
            cycle_len: 6,
        }
    }

    pub fn num_edges(&self) -> u32 {
        1u32 << self.edge_bits
    }
}

fn sip_node(header_prehash: &[u8], edge: u32, side: u8, params: &CuckooParams) -> u32 {
    let digest = Hash::digest_many(&[header_prehash, &edge.to_le_bytes(), &[side]]);
    let val = u64::from_le_bytes(digest.as_bytes()[0..8].try_into().unwrap());
    let mask = (1u64 << params.edge_bits) - 1;
    (val & mask) as u32
}

fn endpoints(header_prehash: &[u8], edge: u32, params: &CuckooParams) -> (u32, u32) {
    let u = sip_node(header_prehash, edge, 0, params) * 2;
    let v = sip_node(header_prehash, edge, 1, params) * 2 + 1;
    (u, v)
}

fn find(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        parent[x as usize] = parent[parent[x as usize] as usize];
        x = parent[x as usize];
    }
    x
}

/// Shortest path (as a list of edge indices) between two nodes of a forest,
/// via BFS. The graph built by `solve` only ever adds tree edges, so any
/// two connected nodes have exactly one such path.
fn bfs_path(adjacency: &[Vec<(u32, u32)>], start: u32, goal: u32) -> Option<Vec<u32>> {
    use std::collections::VecDeque;
    let mut prev: Vec<Option<(u32, u32)>> = vec![None; adjacency.len()];
    let mut visited = vec![false; adjacency.len()];
    let mut queue = VecDeque::new();
    visited[start as usize] = true;
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        if node == goal {
            break;
        }
        for &(other, edge) in &adjacency[node as usize] {
            if !visited[other as usize] {
                visited[other as usize] = true;
                prev[other as usize] = Some((node, edge));
                queue.push_back(other);
            }
        }
    }
    if !visited[goal as usize] {
        return None;
    }
    let mut edges = Vec::new();
    let mut cur = goal;
    while cur != start {
        let (parent_node, edge) = prev[cur as usize]?;
        edges.push(edge);
        cur = parent_node;
    }
    Some(edges)
}

/// Scans the full edge set once for a cycle of exactly `cycle_len` edges.
/// Returns the edge indices of the cycle, ascending, if found.
///
/// Maintains a spanning forest over the bipartite node set with union-find
/// for connectivity and an adjacency list of tree edges for path
/// reconstruction. An edge whose endpoints are already connected closes a
/// cycle through the unique existing path between them.
pub fn solve(header_prehash: &[u8], params: &CuckooParams) -> Option<Vec<u32>> {
    let n = params.num_edges();
    let node_count = (n as usize) * 2;
    let mut parent: Vec<u32> = (0..node_count as u32).collect();
    let mut adjacency: Vec<Vec<(u32, u32)>> = vec![Vec::new(); node_count];

    for i in 0..n {
        let (u, v) = endpoints(header_prehash, i, params);
        let ru = find(&mut parent, u);
        let rv = find(&mut parent, v);
        if ru == rv {
            if let Some(path) = bfs_path(&adjacency, u, v) {
                if path.len() + 1 == params.cycle_len {
                    let mut cycle = path;
                    cycle.push(i);
                    cycle.sort_unstable();
                    return Some(cycle);
                }
            }
            continue;
        }
        parent[ru as usize] = rv;
        adjacency[u as usize].push((v, i));
        adjacency[v as usize].push((u, i));
    }
    None
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CuckooError {
    #[error("solution has {0} edges, expected {1}")]
    WrongLength(usize, usize),
    #[error("edge index {0} out of range")]
    EdgeOutOfRange(u32),
    #[error("solution edges are not strictly ascending or contain duplicates")]
    NotSorted,
    #[error("solution does not form a single {0}-cycle")]
    NotACycle(usize),
}

/// Verifies that `solution` is a valid `cycle_len`-cycle in the bipartite
/// graph defined by `header_prehash`.
pub fn verify(header_prehash: &[u8], solution: &[u32], params: &CuckooParams) -> Result<(), CuckooError> {
    if solution.len() != params.cycle_len {
        return Err(CuckooError::WrongLength(solution.len(), params.cycle_len));
    }
    for w in solution.windows(2) {
        if w[0] >= w[1] {
            return Err(CuckooError::NotSorted);
        }
    }
    let n = params.num_edges();
    let mut adjacency: std::collections::HashMap<u32, Vec<(usize, u32)>> = std::collections::HashMap::new();
    let mut pairs = Vec::with_capacity(solution.len());
    for (idx, &edge) in solution.iter().enumerate() {
        if edge >= n {
            return Err(CuckooError::EdgeOutOfRange(edge));
        }
        let (u, v) = endpoints(header_prehash, edge, params);
        pairs.push((u, v));
        adjacency.entry(u).or_default().push((idx, v));
        adjacency.entry(v).or_default().push((idx, u));
    }
    for edges in adjacency.values() {
        if edges.len() != 2 {
            return Err(CuckooError::NotACycle(params.cycle_len));
        }
    }

    let start = pairs[0].0;
    let mut current = start;
    let mut visited = vec![false; solution.len()];
    let mut steps = 0usize;
    loop {
        let next_edge = adjacency[&current]
            .iter()
            .find(|(idx, _)| !visited[*idx])
            .ok_or(CuckooError::NotACycle(params.cycle_len))?;
        let (idx, other) = *next_edge;
        visited[idx] = true;
        current = other;
        steps += 1;
        if current == start {
            break;
        }
        if steps > solution.len() {
            return Err(CuckooError::NotACycle(params.cycle_len));
        }
    }
    if steps == solution.len() && visited.iter().all(|v| *v) {
        Ok(())
    } else {
        Err(CuckooError::NotACycle(params.cycle_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_and_verifies_small_graph() {
        let params = CuckooParams::regtest();
        let mut found = None;
        for nonce in 0u32..500 {
            let header = nonce.to_le_bytes();
            if let Some(sol) = solve(&header, &params) {
                found = Some((header, sol));
                break;
            }
        }
        let (header, sol) = found.expect("a solution exists within 500 nonces for regtest params");
        assert_eq!(sol.len(), params.cycle_len);
        verify(&header, &sol, &params).unwrap();
    }

    #[test]
    fn rejects_wrong_length() {
        let params = CuckooParams::regtest();
        let err = verify(&[0u8; 4], &[1, 2, 3], &params).unwrap_err();
        assert_eq!(err, CuckooError::WrongLength(3, params.cycle_len));
    }

    #[test]
    fn rejects_tampered_edge() {
        let params = CuckooParams::regtest();
        let mut found = None;
        for nonce in 0u32..500 {
            let header = nonce.to_le_bytes();
            if let Some(sol) = solve(&header, &params) {
                found = Some((header, sol));
                break;
            }
        }
        let (header, mut sol) = found.unwrap();
        sol[0] = sol[0].wrapping_add(1).min(params.num_edges() - 1);
        sol.sort_unstable();
        sol.dedup();
        if sol.len() == params.cycle_len {
            assert!(verify(&header, &sol, &params).is_err());
        }
    }
}
