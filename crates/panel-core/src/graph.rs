//! Arena + index view over a definition's graph
//!
//! Nodes and connections are addressed by position in the definition's
//! vectors. The index is built once per run; connections that reference
//! unknown nodes are left out (validation reports them).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::definition::{Definition, NodeKind};

/// Adjacency structure for one definition
#[derive(Debug, Clone)]
pub struct GraphIndex {
    by_id: HashMap<String, usize>,
    kinds: Vec<NodeKind>,
    /// Connection indices leaving each node
    outgoing: Vec<Vec<usize>>,
    /// Connection indices entering each node
    incoming: Vec<Vec<usize>>,
    /// (source, target) per connection; `None` for dangling connections
    endpoints: Vec<Option<(usize, usize)>>,
    back_edges: HashSet<usize>,
    /// Nodes reachable from the start node
    live: HashSet<usize>,
    start: Option<usize>,
}

impl GraphIndex {
    pub fn build(definition: &Definition) -> Self {
        let mut by_id = HashMap::with_capacity(definition.nodes.len());
        for (idx, node) in definition.nodes.iter().enumerate() {
            by_id.entry(node.id.clone()).or_insert(idx);
        }

        let kinds: Vec<NodeKind> = definition.nodes.iter().map(|n| n.kind).collect();
        let mut outgoing = vec![Vec::new(); kinds.len()];
        let mut incoming = vec![Vec::new(); kinds.len()];
        let mut endpoints = Vec::with_capacity(definition.connections.len());

        for (conn_idx, conn) in definition.connections.iter().enumerate() {
            let pair = by_id
                .get(&conn.source)
                .copied()
                .zip(by_id.get(&conn.target).copied());
            if let Some((source, target)) = pair {
                outgoing[source].push(conn_idx);
                incoming[target].push(conn_idx);
            }
            endpoints.push(pair);
        }

        let start = kinds.iter().position(|k| *k == NodeKind::Start);

        let mut index = Self {
            by_id,
            kinds,
            outgoing,
            incoming,
            endpoints,
            back_edges: HashSet::new(),
            live: HashSet::new(),
            start,
        };
        index.back_edges = index.find_back_edges();
        if let Some(start) = start {
            index.live = index.reachable_from(start);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn index_of(&self, node_id: &str) -> Option<usize> {
        self.by_id.get(node_id).copied()
    }

    pub fn kind(&self, node: usize) -> NodeKind {
        self.kinds[node]
    }

    pub fn start(&self) -> Option<usize> {
        self.start
    }

    pub fn outgoing(&self, node: usize) -> &[usize] {
        &self.outgoing[node]
    }

    pub fn incoming(&self, node: usize) -> &[usize] {
        &self.incoming[node]
    }

    /// Target node of a connection
    pub fn target(&self, conn: usize) -> Option<usize> {
        self.endpoints[conn].map(|(_, target)| target)
    }

    /// Source node of a connection
    pub fn source(&self, conn: usize) -> Option<usize> {
        self.endpoints[conn].map(|(source, _)| source)
    }

    /// Whether the connection closes a loop (points at a DFS ancestor)
    pub fn is_back_edge(&self, conn: usize) -> bool {
        self.back_edges.contains(&conn)
    }

    /// Incoming connections a fan-in barrier waits for
    ///
    /// Back edges and connections from nodes the start node cannot reach
    /// never deliver a token, so they are not counted.
    pub fn forward_in_degree(&self, node: usize) -> usize {
        self.incoming[node]
            .iter()
            .filter(|c| !self.back_edges.contains(c))
            .filter(|&&c| self.source(c).is_some_and(|source| self.live.contains(&source)))
            .count()
    }

    /// Nodes reachable from `from`, including itself
    pub fn reachable_from(&self, from: usize) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node) {
                continue;
            }
            for &conn in &self.outgoing[node] {
                if let Some(target) = self.target(conn) {
                    queue.push_back(target);
                }
            }
        }
        seen
    }

    /// Iterative DFS from the start node; edges into a node still on the
    /// stack are back edges.
    fn find_back_edges(&self) -> HashSet<usize> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut back = HashSet::new();
        let Some(start) = self.start else {
            return back;
        };

        let mut marks = vec![Mark::Unvisited; self.kinds.len()];
        // (node, position in its outgoing list)
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::OnStack;

        while let Some(top) = stack.last_mut() {
            let (node, cursor) = *top;
            top.1 += 1;
            if let Some(&conn) = self.outgoing[node].get(cursor) {
                let Some(target) = self.target(conn) else {
                    continue;
                };
                match marks[target] {
                    Mark::OnStack => {
                        back.insert(conn);
                    }
                    Mark::Unvisited => {
                        marks[target] = Mark::OnStack;
                        stack.push((target, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
        back
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Node;

    fn looped() -> Definition {
        Definition::new("loop", "Loop")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("work", NodeKind::ScriptedExpression))
            .node(Node::new("check", NodeKind::Condition))
            .node(Node::new("end", NodeKind::End))
            .connect("start", "work")
            .connect("work", "check")
            .connect_when("check", "work", false)
            .connect_when("check", "end", true)
    }

    #[test]
    fn test_adjacency() {
        let def = looped();
        let graph = GraphIndex::build(&def);

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.start(), Some(0));
        let check = graph.index_of("check").unwrap();
        assert_eq!(graph.kind(check), NodeKind::Condition);
        assert_eq!(graph.outgoing(check).len(), 2);
        assert_eq!(graph.incoming(graph.index_of("work").unwrap()).len(), 2);
    }

    #[test]
    fn test_back_edge_detection() {
        let graph = GraphIndex::build(&looped());

        // connection 2 is check -> work
        assert!(graph.is_back_edge(2));
        assert!(!graph.is_back_edge(0));
        assert!(!graph.is_back_edge(3));

        let work = graph.index_of("work").unwrap();
        assert_eq!(graph.forward_in_degree(work), 1);
    }

    #[test]
    fn test_dangling_connection_ignored() {
        let def = Definition::new("d", "Dangling")
            .node(Node::new("start", NodeKind::Start))
            .connect("start", "ghost");
        let graph = GraphIndex::build(&def);

        assert!(graph.outgoing(0).is_empty());
        assert_eq!(graph.target(0), None);
        assert_eq!(graph.reachable_from(0).len(), 1);
    }

    #[test]
    fn test_diamond_reachability() {
        let def = Definition::new("d", "Diamond")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("a", NodeKind::RoleInvocation))
            .node(Node::new("b", NodeKind::RoleInvocation))
            .node(Node::new("end", NodeKind::End))
            .connect("start", "a")
            .connect("start", "b")
            .connect("a", "end")
            .connect("b", "end");
        let graph = GraphIndex::build(&def);

        assert_eq!(graph.reachable_from(0).len(), 4);
        assert_eq!(graph.forward_in_degree(3), 2);
        assert!((0..4).all(|c| !graph.is_back_edge(c)));
    }

    #[test]
    fn test_unreachable_predecessor_not_counted() {
        let def = Definition::new("d", "Orphan")
            .node(Node::new("start", NodeKind::Start))
            .node(Node::new("draft", NodeKind::RoleInvocation))
            .node(Node::new("end", NodeKind::End))
            .connect("start", "end")
            .connect("draft", "end");
        let graph = GraphIndex::build(&def);

        assert_eq!(graph.incoming(2).len(), 2);
        assert_eq!(graph.forward_in_degree(2), 1);
    }
}
