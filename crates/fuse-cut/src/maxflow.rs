//! Maximum flow / minimum s-t cut on the cell graph.
//!
//! Dinic's algorithm on a residual graph with `f64` capacities. Terminal edges
//! are added with [`MaxFlow::add_tedge`], which first pushes the flow both
//! terminal edges of a node can trivially carry, so at most one of them remains.
//!
//! After [`MaxFlow::compute`], a node is on the sink side when it can still
//! reach the sink in the residual graph. Nodes that can reach neither terminal
//! are reported on the source side.

const NONE: u32 = u32::MAX;

/// Residual capacities at or below this are treated as saturated.
const EPS: f64 = 1e-9;

/// Flow network over `n` nodes plus a source and a sink.
#[derive(Debug, Clone)]
pub struct MaxFlow {
    nodes: usize,
    head: Vec<u32>,
    to: Vec<u32>,
    next: Vec<u32>,
    cap: Vec<f64>,
    flow: f64,
    sink_side: Vec<bool>,
}

impl MaxFlow {
    pub fn new(nodes: usize) -> Self {
        Self::with_capacity(nodes, 0)
    }

    /// Network with room for `edges` node-to-node edges.
    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            nodes,
            head: vec![NONE; nodes + 2],
            to: Vec::with_capacity(2 * edges),
            next: Vec::with_capacity(2 * edges),
            cap: Vec::with_capacity(2 * edges),
            flow: 0.0,
            sink_side: Vec::new(),
        }
    }

    #[inline]
    fn source(&self) -> usize {
        self.nodes
    }

    #[inline]
    fn sink(&self) -> usize {
        self.nodes + 1
    }

    fn push_arc(&mut self, from: usize, to: usize, cap: f64) {
        self.to.push(to as u32);
        self.next.push(self.head[from]);
        self.cap.push(cap);
        self.head[from] = (self.to.len() - 1) as u32;
    }

    /// Edge `i -> j` with capacity `cap_ij` and `j -> i` with `cap_ji`.
    pub fn add_edge(&mut self, i: usize, j: usize, cap_ij: f64, cap_ji: f64) {
        assert!(i < self.nodes && j < self.nodes, "node index out of range");
        self.push_arc(i, j, cap_ij.max(0.0));
        self.push_arc(j, i, cap_ji.max(0.0));
    }

    /// Terminal edges `source -> i` and `i -> sink`.
    pub fn add_tedge(&mut self, i: usize, cap_source: f64, cap_sink: f64) {
        assert!(i < self.nodes, "node index out of range");
        let (s, t) = (cap_source.max(0.0), cap_sink.max(0.0));
        let trivial = s.min(t);
        self.flow += trivial;
        let (s, t) = (s - trivial, t - trivial);
        if s > 0.0 {
            let source = self.source();
            self.push_arc(source, i, s);
            self.push_arc(i, source, 0.0);
        }
        if t > 0.0 {
            let sink = self.sink();
            self.push_arc(i, sink, t);
            self.push_arc(sink, i, 0.0);
        }
    }

    /// Run the flow and return its value, trivially pushed terminal flow included.
    pub fn compute(&mut self) -> f64 {
        let (s, t) = (self.source(), self.sink());
        let total = self.nodes + 2;
        let mut level = vec![-1i32; total];
        let mut it = vec![NONE; total];
        let mut queue = Vec::with_capacity(total);
        let mut path: Vec<u32> = Vec::new();

        loop {
            // Level graph
            level.fill(-1);
            level[s] = 0;
            queue.clear();
            queue.push(s);
            let mut qi = 0;
            while qi < queue.len() {
                let u = queue[qi];
                qi += 1;
                let mut e = self.head[u];
                while e != NONE {
                    let v = self.to[e as usize] as usize;
                    if self.cap[e as usize] > EPS && level[v] < 0 {
                        level[v] = level[u] + 1;
                        queue.push(v);
                    }
                    e = self.next[e as usize];
                }
            }
            if level[t] < 0 {
                break;
            }

            // Blocking flow
            it.copy_from_slice(&self.head);
            path.clear();
            let mut u = s;
            loop {
                if u == t {
                    let bottleneck = path
                        .iter()
                        .map(|&e| self.cap[e as usize])
                        .fold(f64::INFINITY, f64::min);
                    for &e in &path {
                        self.cap[e as usize] -= bottleneck;
                        self.cap[(e ^ 1) as usize] += bottleneck;
                    }
                    self.flow += bottleneck;
                    path.clear();
                    u = s;
                    continue;
                }

                let mut advanced = false;
                while it[u] != NONE {
                    let e = it[u] as usize;
                    let v = self.to[e] as usize;
                    if self.cap[e] > EPS && level[v] == level[u] + 1 {
                        path.push(e as u32);
                        u = v;
                        advanced = true;
                        break;
                    }
                    it[u] = self.next[e];
                }
                if advanced {
                    continue;
                }

                // Dead end: retreat one edge
                if u == s {
                    break;
                }
                level[u] = -1;
                let Some(e) = path.pop() else {
                    break;
                };
                u = self.to[(e ^ 1) as usize] as usize;
                it[u] = self.next[e as usize];
            }
        }

        self.mark_sink_side();
        self.flow
    }

    /// Nodes that can reach the sink through residual capacity.
    fn mark_sink_side(&mut self) {
        let total = self.nodes + 2;
        let mut reach = vec![false; total];
        let t = self.sink();
        reach[t] = true;
        let mut stack = vec![t];
        while let Some(v) = stack.pop() {
            let mut e = self.head[v];
            while e != NONE {
                // e: v -> u, its reverse u -> v carries the residual toward v
                let u = self.to[e as usize] as usize;
                if !reach[u] && self.cap[(e ^ 1) as usize] > EPS {
                    reach[u] = true;
                    stack.push(u);
                }
                e = self.next[e as usize];
            }
        }
        reach.truncate(self.nodes);
        self.sink_side = reach;
    }

    /// Whether node `i` ended on the sink side of the minimum cut.
    #[inline]
    pub fn is_sink_side(&self, i: usize) -> bool {
        self.sink_side.get(i).copied().unwrap_or(false)
    }

    pub fn flow(&self) -> f64 {
        self.flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_chain_cut_at_weakest_edge() {
        // source -> 0 -> 1 -> 2 -> sink, weakest link between 1 and 2
        let mut g = MaxFlow::new(3);
        g.add_tedge(0, 10.0, 0.0);
        g.add_tedge(2, 0.0, 10.0);
        g.add_edge(0, 1, 5.0, 0.0);
        g.add_edge(1, 2, 2.0, 0.0);
        assert_relative_eq!(g.compute(), 2.0, epsilon = 1e-12);
        assert!(!g.is_sink_side(0));
        assert!(!g.is_sink_side(1));
        assert!(g.is_sink_side(2));
    }

    #[test]
    fn test_trivial_terminal_push() {
        let mut g = MaxFlow::new(1);
        g.add_tedge(0, 3.0, 5.0);
        assert_relative_eq!(g.compute(), 3.0, epsilon = 1e-12);
        assert!(g.is_sink_side(0));
    }

    #[test]
    fn test_isolated_node_is_source_side() {
        let mut g = MaxFlow::new(2);
        g.add_tedge(0, 0.0, 1.0);
        g.compute();
        assert!(g.is_sink_side(0));
        assert!(!g.is_sink_side(1));
    }

    #[test]
    fn test_classic_network() {
        // CLRS flow network, max flow 23
        let mut g = MaxFlow::new(4);
        g.add_tedge(0, 16.0, 0.0);
        g.add_tedge(1, 13.0, 0.0);
        g.add_edge(0, 2, 12.0, 0.0);
        g.add_edge(1, 0, 4.0, 0.0);
        g.add_edge(2, 1, 9.0, 0.0);
        g.add_edge(1, 3, 14.0, 0.0);
        g.add_edge(3, 2, 7.0, 0.0);
        g.add_tedge(2, 0.0, 20.0);
        g.add_tedge(3, 0.0, 4.0);
        assert_relative_eq!(g.compute(), 23.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cut_capacity_equals_flow() {
        let mut g = MaxFlow::new(4);
        let edges = [(0, 1, 3.0, 1.0), (1, 2, 2.5, 0.5), (2, 3, 4.0, 0.0), (0, 2, 1.0, 1.0)];
        for &(i, j, a, b) in &edges {
            g.add_edge(i, j, a, b);
        }
        g.add_tedge(0, 6.0, 0.0);
        g.add_tedge(3, 0.0, 6.0);
        g.add_tedge(1, 0.5, 0.2);
        let flow = g.compute();

        let side: Vec<bool> = (0..4).map(|i| g.is_sink_side(i)).collect();
        let terminals = [(6.0, 0.0), (0.3, 0.0), (0.0, 0.0), (0.0, 6.0)];
        let mut cut = 0.2; // trivially pushed on node 1
        for (i, &(s, t)) in terminals.iter().enumerate() {
            cut += if side[i] { s } else { t };
        }
        for &(i, j, a, b) in &edges {
            if !side[i] && side[j] {
                cut += a;
            }
            if !side[j] && side[i] {
                cut += b;
            }
        }
        assert_relative_eq!(cut, flow, epsilon = 1e-9);
    }
}
