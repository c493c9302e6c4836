//! Parent/child walks over the process table, bounded in depth and guarded
//! against cycles reported by an inconsistent table.

use super::{ProcessStatus, ProcessTable};
use crate::error::SentinelError;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestryNode {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    /// Distance from the query root
    pub depth: usize,
}

/// Upward walk result. `complete` is false when the walk stopped before
/// reaching a process without a parent (depth cap or cycle).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorChain {
    pub nodes: Vec<AncestryNode>,
    pub complete: bool,
}

impl AncestorChain {
    /// True when `pid` is a strict ancestor of the chain's root.
    pub fn contains_ancestor(&self, pid: u32) -> bool {
        self.nodes.iter().skip(1).any(|n| n.pid == pid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTreeNode {
    pub pid: u32,
    pub name: String,
    pub status: ProcessStatus,
    pub memory_bytes: u64,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProcessTreeNode>,
}

pub struct AncestryResolver<'a> {
    table: &'a dyn ProcessTable,
}

impl<'a> AncestryResolver<'a> {
    pub fn new(table: &'a dyn ProcessTable) -> Self {
        Self { table }
    }

    /// Ordered chain from `pid` (depth 0) upward. Empty if `pid` does not exist.
    pub fn ancestors(&self, pid: u32, max_depth: usize) -> Vec<AncestryNode> {
        self.ancestor_chain(pid, max_depth).nodes
    }

    pub fn ancestor_chain(&self, pid: u32, max_depth: usize) -> AncestorChain {
        if !self.table.exists(pid) {
            return AncestorChain::default();
        }
        let mut nodes = vec![AncestryNode {
            pid,
            parent_pid: self.table.parent_of(pid),
            depth: 0,
        }];
        let mut visited = HashSet::from([pid]);
        let mut current = nodes[0];
        loop {
            let Some(parent) = current.parent_pid else {
                return AncestorChain { nodes, complete: true };
            };
            if current.depth >= max_depth {
                break;
            }
            if !visited.insert(parent) {
                log_cycle(parent);
                break;
            }
            if !self.table.exists(parent) {
                // Parent exited or is outside our view (e.g. pid 0); the chain ends here.
                return AncestorChain { nodes, complete: true };
            }
            current = AncestryNode {
                pid: parent,
                parent_pid: self.table.parent_of(parent),
                depth: current.depth + 1,
            };
            nodes.push(current);
        }
        AncestorChain { nodes, complete: false }
    }

    /// Breadth-first descendants of `pid`, including `pid` itself at depth 0.
    pub fn descendants(&self, pid: u32, max_depth: usize) -> Vec<AncestryNode> {
        if !self.table.exists(pid) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut visited = HashSet::from([pid]);
        let mut queue = VecDeque::from([AncestryNode {
            pid,
            parent_pid: self.table.parent_of(pid),
            depth: 0,
        }]);
        while let Some(node) = queue.pop_front() {
            out.push(node);
            if node.depth >= max_depth {
                continue;
            }
            for child in self.table.children_of(node.pid) {
                if !visited.insert(child) {
                    log_cycle(child);
                    continue;
                }
                queue.push_back(AncestryNode {
                    pid: child,
                    parent_pid: Some(node.pid),
                    depth: node.depth + 1,
                });
            }
        }
        out
    }

    /// True when `candidate` appears strictly above `pid` within `max_depth`.
    pub fn is_ancestor(&self, candidate: u32, pid: u32, max_depth: usize) -> bool {
        self.ancestor_chain(pid, max_depth).contains_ancestor(candidate)
    }

    /// Nested view of the descendants of `pid`.
    pub fn tree(&self, pid: u32, max_depth: usize) -> Option<ProcessTreeNode> {
        let flat = self.descendants(pid, max_depth);
        let root = flat.first()?;
        Some(self.build_node(root, &flat))
    }

    fn build_node(&self, node: &AncestryNode, flat: &[AncestryNode]) -> ProcessTreeNode {
        let record = self.table.record(node.pid);
        let children = flat
            .iter()
            .filter(|n| n.depth == node.depth + 1 && n.parent_pid == Some(node.pid))
            .map(|n| self.build_node(n, flat))
            .collect();
        ProcessTreeNode {
            pid: node.pid,
            name: record.as_ref().map(|r| r.name.clone()).unwrap_or_default(),
            status: record.as_ref().map(|r| r.status).unwrap_or(ProcessStatus::Unknown),
            memory_bytes: record.as_ref().map(|r| r.memory_bytes).unwrap_or(0),
            depth: node.depth,
            children,
        }
    }
}

fn log_cycle(pid: u32) {
    let err = SentinelError::AncestryCycleDetected { pid };
    debug!(error = %err, "truncating ancestry walk");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{MemoryTable, ProcessRecord};
    use chrono::Utc;

    fn node(pid: u32, parent: Option<u32>) -> ProcessRecord {
        ProcessRecord {
            pid,
            parent_pid: parent,
            name: format!("p{pid}"),
            owner: None,
            command_line: Vec::new(),
            cpu_percent: 0.0,
            memory_bytes: 0,
            thread_count: None,
            start_time: Utc::now(),
            status: ProcessStatus::Sleeping,
        }
    }

    /// 1 -> 100 -> 200 -> {300, 301}; 300 -> 400
    fn sample_tree() -> MemoryTable {
        MemoryTable::from_records([
            node(1, None),
            node(100, Some(1)),
            node(200, Some(100)),
            node(300, Some(200)),
            node(301, Some(200)),
            node(400, Some(300)),
        ])
    }

    #[test]
    fn ancestors_walk_to_root() {
        let table = sample_tree();
        let r = AncestryResolver::new(&table);
        let chain = r.ancestor_chain(400, DEFAULT_MAX_DEPTH);
        let pids: Vec<u32> = chain.nodes.iter().map(|n| n.pid).collect();
        assert_eq!(pids, vec![400, 300, 200, 100, 1]);
        assert!(chain.complete);
        assert!(chain.nodes.windows(2).all(|w| w[0].depth + 1 == w[1].depth));
        assert!(r.is_ancestor(100, 400, DEFAULT_MAX_DEPTH));
        assert!(!r.is_ancestor(301, 400, DEFAULT_MAX_DEPTH));
        assert!(!r.is_ancestor(400, 400, DEFAULT_MAX_DEPTH));
    }

    #[test]
    fn ancestors_respect_depth_cap() {
        let table = sample_tree();
        let chain = AncestryResolver::new(&table).ancestor_chain(400, 2);
        let pids: Vec<u32> = chain.nodes.iter().map(|n| n.pid).collect();
        assert_eq!(pids, vec![400, 300, 200]);
        assert!(!chain.complete);
    }

    #[test]
    fn cycle_terminates_walk() {
        let table = MemoryTable::from_records([node(10, Some(11)), node(11, Some(10))]);
        let r = AncestryResolver::new(&table);
        let chain = r.ancestor_chain(10, 50);
        let pids: Vec<u32> = chain.nodes.iter().map(|n| n.pid).collect();
        assert_eq!(pids, vec![10, 11]);
        assert!(!chain.complete);
        assert_eq!(r.descendants(10, 50).len(), 2);
    }

    #[test]
    fn missing_pid_yields_empty_result() {
        let table = sample_tree();
        let r = AncestryResolver::new(&table);
        assert!(r.ancestors(999, 10).is_empty());
        assert!(r.descendants(999, 10).is_empty());
        assert!(r.tree(999, 10).is_none());
    }

    #[test]
    fn descendants_are_breadth_first_and_bounded() {
        let table = sample_tree();
        let r = AncestryResolver::new(&table);
        let all: Vec<(u32, usize)> = r.descendants(100, 10).iter().map(|n| (n.pid, n.depth)).collect();
        assert_eq!(all, vec![(100, 0), (200, 1), (300, 2), (301, 2), (400, 3)]);
        let shallow: Vec<u32> = r.descendants(100, 1).iter().map(|n| n.pid).collect();
        assert_eq!(shallow, vec![100, 200]);
    }

    #[test]
    fn tree_nests_children() {
        let table = sample_tree();
        let tree = AncestryResolver::new(&table).tree(200, 10).unwrap();
        assert_eq!(tree.pid, 200);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].pid, 300);
        assert_eq!(tree.children[0].children[0].pid, 400);
        assert!(tree.children[1].children.is_empty());
    }
}
