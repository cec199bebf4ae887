//! Minimum-cost bipartite assignment.
//!
//! Both legalizers reduce their candidate graphs to an [`AssignmentProblem`]:
//! demand nodes (units or unit slots) on one side, supply nodes (sites or
//! site slots) on the other, and sparse edge lists with non-negative cost.
//! [`solve`] finds a maximum-cardinality matching of minimum total cost at
//! that cardinality using successive shortest paths with node potentials.
//! [`solve_components`] splits the graph into connected components first
//! and solves them in parallel; the result is identical.

use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A sparse bipartite assignment problem.
#[derive(Debug, Clone, Default)]
pub struct AssignmentProblem {
    /// Number of demand nodes.
    pub demand: usize,
    /// Number of supply nodes.
    pub supply: usize,
    /// Per demand node, `(supply, cost)` pairs. Absent pairs are infeasible.
    pub edges: Vec<Vec<(usize, f64)>>,
}

impl AssignmentProblem {
    /// Creates a problem without edges.
    pub fn new(demand: usize, supply: usize) -> Self {
        Self {
            demand,
            supply,
            edges: vec![Vec::new(); demand],
        }
    }

    /// Adds a feasible pair. Non-finite costs and out-of-range nodes are
    /// ignored.
    pub fn add_edge(&mut self, demand: usize, supply: usize, cost: f64) {
        if demand < self.demand && supply < self.supply && cost.is_finite() {
            self.edges[demand].push((supply, cost));
        }
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }
}

/// The solution of an [`AssignmentProblem`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assignment {
    /// The supply node assigned to each demand node.
    pub pairs: Vec<Option<usize>>,
    /// Total cost of the matched edges.
    pub cost: f64,
}

impl Assignment {
    /// Number of matched demand nodes.
    pub fn matched(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_some()).count()
    }

    /// The supply node matched to `demand`.
    pub fn supply_of(&self, demand: usize) -> Option<usize> {
        self.pairs.get(demand).copied().flatten()
    }
}

#[derive(Clone, Copy, PartialEq)]
struct Key(f64, usize);

impl Eq for Key {}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Solves the problem as one graph.
///
/// Each phase runs Dijkstra from every free demand node at once over
/// reduced costs, augments along the path to the nearest free supply node,
/// and raises potentials by the capped distances so reduced costs stay
/// non-negative. Ties go to the lowest node index.
pub fn solve(problem: &AssignmentProblem) -> Assignment {
    let n = problem.demand;
    let m = problem.supply;
    let shift = problem
        .edges
        .iter()
        .flatten()
        .map(|&(_, c)| c)
        .fold(0.0_f64, f64::min);
    let cost = |c: f64| c - shift;

    let mut pot = vec![0.0_f64; n + m];
    let mut match_d: Vec<Option<usize>> = vec![None; n];
    let mut match_s: Vec<Option<usize>> = vec![None; m];
    let mut matched_cost = vec![0.0_f64; n];

    let mut dist = vec![f64::INFINITY; n + m];
    let mut prev = vec![usize::MAX; n + m];
    let mut via_cost = vec![0.0_f64; n + m];

    loop {
        dist.iter_mut().for_each(|d| *d = f64::INFINITY);
        prev.iter_mut().for_each(|p| *p = usize::MAX);
        let mut heap = BinaryHeap::new();
        for i in 0..n {
            if match_d[i].is_none() && !problem.edges[i].is_empty() {
                dist[i] = 0.0;
                heap.push(Reverse(Key(0.0, i)));
            }
        }

        let mut target = None;
        while let Some(Reverse(Key(d, u))) = heap.pop() {
            if d > dist[u] {
                continue;
            }
            if u < n {
                for &(j, c) in &problem.edges[u] {
                    if match_d[u] == Some(j) {
                        continue;
                    }
                    let v = n + j;
                    let nd = d + (cost(c) + pot[u] - pot[v]).max(0.0);
                    if nd < dist[v] {
                        dist[v] = nd;
                        prev[v] = u;
                        via_cost[v] = cost(c);
                        heap.push(Reverse(Key(nd, v)));
                    }
                }
            } else {
                let j = u - n;
                match match_s[j] {
                    None => {
                        target = Some((j, d));
                        break;
                    }
                    Some(i) => {
                        let nd = d + (-matched_cost[i] + pot[u] - pot[i]).max(0.0);
                        if nd < dist[i] {
                            dist[i] = nd;
                            prev[i] = u;
                            heap.push(Reverse(Key(nd, i)));
                        }
                    }
                }
            }
        }

        let Some((j_end, reach)) = target else {
            break;
        };
        for (p, &d) in pot.iter_mut().zip(&dist) {
            *p += d.min(reach);
        }

        let mut j = j_end;
        loop {
            let i = prev[n + j];
            let previous = match_d[i];
            match_d[i] = Some(j);
            match_s[j] = Some(i);
            matched_cost[i] = via_cost[n + j];
            match previous {
                Some(old) => j = old,
                None => break,
            }
        }
    }

    let total = match_d
        .iter()
        .zip(&matched_cost)
        .filter(|(p, _)| p.is_some())
        .map(|(_, &c)| c + shift)
        .sum();
    Assignment {
        pairs: match_d,
        cost: total,
    }
}

/// Solves each connected component independently and in parallel.
///
/// Components are ordered by their lowest demand index and merged in that
/// order, so the result does not depend on scheduling.
pub fn solve_components(problem: &AssignmentProblem) -> Assignment {
    let n = problem.demand;
    let m = problem.supply;
    let mut uf = UnionFind::<usize>::new(n + m);
    for (i, list) in problem.edges.iter().enumerate() {
        for &(j, _) in list {
            uf.union(i, n + j);
        }
    }
    let labels = uf.into_labeling();

    let mut component_of_root = vec![usize::MAX; n + m];
    let mut components: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();
    for i in 0..n {
        if problem.edges[i].is_empty() {
            continue;
        }
        let root = labels[i];
        if component_of_root[root] == usize::MAX {
            component_of_root[root] = components.len();
            components.push((Vec::new(), Vec::new()));
        }
        components[component_of_root[root]].0.push(i);
    }
    for j in 0..m {
        let c = component_of_root[labels[n + j]];
        if c != usize::MAX {
            components[c].1.push(j);
        }
    }

    let solved: Vec<Assignment> = components
        .par_iter()
        .map(|(demand, supply)| {
            let mut local_supply = vec![usize::MAX; m];
            for (k, &j) in supply.iter().enumerate() {
                local_supply[j] = k;
            }
            let mut sub = AssignmentProblem::new(demand.len(), supply.len());
            for (k, &i) in demand.iter().enumerate() {
                for &(j, c) in &problem.edges[i] {
                    sub.add_edge(k, local_supply[j], c);
                }
            }
            solve(&sub)
        })
        .collect();

    let mut result = Assignment {
        pairs: vec![None; n],
        cost: 0.0,
    };
    for ((demand, supply), sub) in components.iter().zip(&solved) {
        for (k, &i) in demand.iter().enumerate() {
            result.pairs[i] = sub.pairs[k].map(|local| supply[local]);
        }
        result.cost += sub.cost;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute(problem: &AssignmentProblem) -> (usize, f64) {
        fn go(p: &AssignmentProblem, i: usize, used: &mut Vec<bool>, best: &mut (usize, f64), k: usize, c: f64) {
            if i == p.demand {
                if k > best.0 || (k == best.0 && c < best.1 - 1e-9) {
                    *best = (k, c);
                }
                return;
            }
            go(p, i + 1, used, best, k, c);
            for &(j, w) in &p.edges[i] {
                if !used[j] {
                    used[j] = true;
                    go(p, i + 1, used, best, k + 1, c + w);
                    used[j] = false;
                }
            }
        }
        let mut best = (0, 0.0);
        go(problem, 0, &mut vec![false; problem.supply], &mut best, 0, 0.0);
        best
    }

    fn check_valid(problem: &AssignmentProblem, a: &Assignment) {
        let mut used = vec![false; problem.supply];
        let mut cost = 0.0;
        for (i, p) in a.pairs.iter().enumerate() {
            if let Some(j) = *p {
                assert!(!used[j], "supply {j} used twice");
                used[j] = true;
                let c = problem.edges[i]
                    .iter()
                    .filter(|e| e.0 == j)
                    .map(|e| e.1)
                    .fold(f64::INFINITY, f64::min);
                assert!(c.is_finite(), "demand {i} matched without an edge");
                cost += c;
            }
        }
        assert!((cost - a.cost).abs() < 1e-6);
    }

    #[test]
    fn simple_square() {
        let mut p = AssignmentProblem::new(2, 2);
        p.add_edge(0, 0, 1.0);
        p.add_edge(0, 1, 2.0);
        p.add_edge(1, 0, 1.0);
        p.add_edge(1, 1, 5.0);
        let a = solve(&p);
        assert_eq!(a.pairs, vec![Some(1), Some(0)]);
        assert_eq!(a.cost, 3.0);
    }

    #[test]
    fn cardinality_beats_cost() {
        // matching 0->0 is cheap but blocks demand 1 entirely
        let mut p = AssignmentProblem::new(2, 2);
        p.add_edge(0, 0, 0.0);
        p.add_edge(0, 1, 10.0);
        p.add_edge(1, 0, 0.0);
        let a = solve(&p);
        assert_eq!(a.matched(), 2);
        assert_eq!(a.supply_of(0), Some(1));
        assert_eq!(a.supply_of(1), Some(0));
    }

    #[test]
    fn more_demand_than_supply() {
        let mut p = AssignmentProblem::new(3, 2);
        for i in 0..3 {
            for j in 0..2 {
                p.add_edge(i, j, (i + j) as f64);
            }
        }
        let a = solve(&p);
        assert_eq!(a.matched(), 2);
        check_valid(&p, &a);
    }

    #[test]
    fn ties_prefer_lowest_index() {
        let mut p = AssignmentProblem::new(1, 3);
        p.add_edge(0, 2, 1.0);
        p.add_edge(0, 1, 1.0);
        p.add_edge(0, 0, 1.0);
        assert_eq!(solve(&p).supply_of(0), Some(0));
    }

    #[test]
    fn infeasible_edges_ignored() {
        let mut p = AssignmentProblem::new(1, 1);
        p.add_edge(0, 0, f64::INFINITY);
        p.add_edge(0, 5, 1.0);
        assert_eq!(p.edge_count(), 0);
        assert_eq!(solve(&p).matched(), 0);
    }

    #[test]
    fn negative_costs() {
        let mut p = AssignmentProblem::new(2, 2);
        p.add_edge(0, 0, -3.0);
        p.add_edge(0, 1, -1.0);
        p.add_edge(1, 0, -2.0);
        p.add_edge(1, 1, -2.0);
        let a = solve(&p);
        assert_eq!(a.cost, -5.0);
        check_valid(&p, &a);
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..=5);
            let m = rng.gen_range(1..=5);
            let mut p = AssignmentProblem::new(n, m);
            for i in 0..n {
                for j in 0..m {
                    if rng.gen_bool(0.6) {
                        p.add_edge(i, j, rng.gen_range(0..20) as f64);
                    }
                }
            }
            let (k, c) = brute(&p);
            for a in [solve(&p), solve_components(&p)] {
                check_valid(&p, &a);
                assert_eq!(a.matched(), k);
                assert!((a.cost - c).abs() < 1e-6, "cost {} vs brute {c}", a.cost);
            }
        }
    }

    #[test]
    fn components_agree_with_whole_graph() {
        let mut p = AssignmentProblem::new(4, 4);
        p.add_edge(0, 0, 1.0);
        p.add_edge(1, 0, 2.0);
        p.add_edge(1, 1, 4.0);
        p.add_edge(2, 3, 1.0);
        p.add_edge(3, 3, 0.5);
        p.add_edge(3, 2, 3.0);
        let whole = solve(&p);
        let split = solve_components(&p);
        assert_eq!(whole, split);
    }
}
