/// Static routing topology: which Host connects to which server.
///
/// Every Host parses the same host descriptions into the same tree. The
/// root is the one server that connects to nobody; every other Host is a
/// child of the server it connects to. Nodes live in an arena and refer
/// to each other by [`NodeIndex`], so the tree is plain owned data that can
/// be shared behind an `Arc` and swapped wholesale on reload.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::HostDescription;
use crate::error::RoutingError;

/// Position of a node inside its [`RoutingTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

#[derive(Debug, Clone)]
pub struct RoutingNode {
    name: String,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
}

impl RoutingNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }
}

/// Which way a message travels from the resolving Host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Toward the root, through the server this Host connects to.
    Up,
    /// Away from the root, toward one of this Host's descendants.
    Down,
    /// Source and target are the same Host.
    Local,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
            Direction::Local => f.write_str("local"),
        }
    }
}

/// Resolved path between two Hosts.
///
/// `path` lists every Host after the source, ending with the target.
/// A local route is `[target]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: Vec<String>,
    pub direction: Direction,
}

impl Route {
    /// First Host the message must be handed to.
    pub fn next_hop(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }

    /// Number of Host-to-Host hops.
    pub fn hops(&self) -> usize {
        self.path.len()
    }

    /// Whether the target is directly connected to the source.
    pub fn is_direct(&self) -> bool {
        self.path.len() == 1
    }
}

// ── Tree ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoutingTree {
    nodes: Vec<RoutingNode>,
    by_name: HashMap<String, NodeIndex>,
    root: NodeIndex,
}

impl RoutingTree {
    /// Parse host descriptions into a validated tree.
    pub fn from_hosts<'a>(
        hosts: impl IntoIterator<Item = &'a HostDescription>,
    ) -> Result<Self, RoutingError> {
        RoutingTreeParser::parse(hosts)
    }

    pub fn root(&self) -> &RoutingNode {
        &self.nodes[self.root.0]
    }

    pub fn root_name(&self) -> &str {
        self.root().name()
    }

    pub fn node(&self, index: NodeIndex) -> &RoutingNode {
        &self.nodes[index.0]
    }

    pub fn lookup_host(&self, hostname: &str) -> Option<NodeIndex> {
        self.by_name.get(hostname).copied()
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.by_name.contains_key(hostname)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every Host name, in description order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(RoutingNode::name)
    }

    /// Name of the server `hostname` connects to.
    pub fn parent_of(&self, hostname: &str) -> Option<&str> {
        let index = self.lookup_host(hostname)?;
        self.node(index).parent.map(|p| self.node(p).name())
    }

    /// View of the subtree rooted at `hostname`.
    pub fn subtree(&self, hostname: &str) -> Option<SubTree<'_>> {
        self.lookup_host(hostname).map(|root| SubTree { tree: self, root })
    }

    /// All Hosts below `hostname` (children, their children, and so on).
    pub fn descendants_of(&self, hostname: &str) -> Result<Vec<String>, RoutingError> {
        let subtree = self.subtree(hostname).ok_or_else(|| RoutingError::UnknownHost {
            host: hostname.to_string(),
        })?;
        Ok(subtree.descendants().into_iter().map(str::to_string).collect())
    }

    pub fn is_direct_child_of(&self, child: &str, parent: &str) -> bool {
        self.parent_of(child) == Some(parent)
    }

    /// `index` followed by each of its ancestors up to the root.
    fn ancestor_chain(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut chain = vec![index];
        let mut current = index;
        while let Some(parent) = self.node(current).parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Resolve the path from `source` to `target`, evaluated at `source`.
    ///
    /// The path climbs from `source` to the lowest common ancestor and
    /// descends from there to `target`. Direction is `Down` only when the
    /// target sits below the source; any route that has to climb first is
    /// `Up`, because this Host can only hand it to its own server. That
    /// server resolves the next step the same way once the message arrives.
    pub fn route_between(&self, source: &str, target: &str) -> Result<Route, RoutingError> {
        let source_index = self.lookup_host(source).ok_or_else(|| RoutingError::UnknownHost {
            host: source.to_string(),
        })?;
        let target_index = self.lookup_host(target).ok_or_else(|| RoutingError::UnknownHost {
            host: target.to_string(),
        })?;

        if source_index == target_index {
            return Ok(Route {
                path: vec![target.to_string()],
                direction: Direction::Local,
            });
        }

        let source_chain = self.ancestor_chain(source_index);
        let target_chain = self.ancestor_chain(target_index);
        let target_set: HashSet<NodeIndex> = target_chain.iter().copied().collect();

        // Both chains end at the root, so a common ancestor always exists.
        let (lca_in_source, lca) = source_chain
            .iter()
            .copied()
            .enumerate()
            .find(|(_, node)| target_set.contains(node))
            .ok_or_else(|| RoutingError::UnknownHost {
                host: target.to_string(),
            })?;
        let lca_in_target = target_chain
            .iter()
            .position(|node| *node == lca)
            .ok_or_else(|| RoutingError::UnknownHost {
                host: target.to_string(),
            })?;

        let upward = source_chain[1..=lca_in_source].iter();
        let downward = target_chain[..lca_in_target].iter().rev();
        let path = upward
            .chain(downward)
            .map(|index| self.node(*index).name.clone())
            .collect();

        let direction = if lca == source_index {
            Direction::Down
        } else {
            Direction::Up
        };

        Ok(Route { path, direction })
    }
}

impl fmt::Display for RoutingTree {
    /// One Host per line, indented by one tab per tree level.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(0usize, self.root)];
        while let Some((level, index)) = stack.pop() {
            let node = self.node(index);
            writeln!(f, "{}{}", "\t".repeat(level), node.name)?;
            for child in node.children.iter().rev() {
                stack.push((level + 1, *child));
            }
        }
        Ok(())
    }
}

/// Borrowed view of the part of a [`RoutingTree`] below one Host.
#[derive(Debug, Clone, Copy)]
pub struct SubTree<'a> {
    tree: &'a RoutingTree,
    root: NodeIndex,
}

impl<'a> SubTree<'a> {
    pub fn name(&self) -> &'a str {
        self.tree.node(self.root).name()
    }

    /// Names of the direct children.
    pub fn children(&self) -> Vec<&'a str> {
        self.tree
            .node(self.root)
            .children
            .iter()
            .map(|c| self.tree.node(*c).name())
            .collect()
    }

    /// Every Host below the view's root, depth first.
    pub fn descendants(&self) -> Vec<&'a str> {
        let tree = self.tree;
        let mut out = Vec::new();
        let mut stack: Vec<NodeIndex> = tree.node(self.root).children.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            let node = tree.node(index);
            out.push(node.name());
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Whether `hostname` lies strictly below the view's root.
    pub fn contains(&self, hostname: &str) -> bool {
        let Some(mut current) = self.tree.lookup_host(hostname) else {
            return false;
        };
        while let Some(parent) = self.tree.node(current).parent {
            if parent == self.root {
                return true;
            }
            current = parent;
        }
        false
    }
}

/// Current tree of one Host, shared by its routers and replaced on reload.
#[derive(Debug, Clone, Default)]
pub struct SharedTopology(Arc<RwLock<Option<Arc<RoutingTree>>>>);

impl SharedTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(tree: RoutingTree) -> Self {
        let topology = Self::new();
        topology.replace(tree);
        topology
    }

    pub fn replace(&self, tree: RoutingTree) {
        *self.0.write() = Some(Arc::new(tree));
    }

    /// Snapshot of the current tree, `None` before the first build.
    pub fn get(&self) -> Option<Arc<RoutingTree>> {
        self.0.read().clone()
    }

    pub fn current(&self) -> Result<Arc<RoutingTree>, RoutingError> {
        self.get().ok_or(RoutingError::RoutingTableNotBuilt)
    }
}

// ── Parser ─────────────────────────────────────────────────────────────

/// Builds a [`RoutingTree`] from host descriptions, rejecting malformed topologies.
pub struct RoutingTreeParser;

impl RoutingTreeParser {
    pub fn parse<'a>(
        hosts: impl IntoIterator<Item = &'a HostDescription>,
    ) -> Result<RoutingTree, RoutingError> {
        let hosts: Vec<&HostDescription> = hosts.into_iter().collect();
        if hosts.is_empty() {
            return Err(RoutingError::EmptyTopology);
        }

        Self::check_server_addresses(&hosts)?;
        let (mut nodes, by_name) = Self::create_nodes(&hosts)?;
        let root = Self::link_nodes(&hosts, &mut nodes, &by_name)?;

        let tree = RoutingTree {
            nodes,
            by_name,
            root,
        };
        Self::check_connected(&tree)?;

        tracing::debug!(
            root = tree.root_name(),
            hosts = tree.len(),
            "routing tree parsed"
        );
        Ok(tree)
    }

    fn check_server_addresses(hosts: &[&HostDescription]) -> Result<(), RoutingError> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for host in hosts {
            if host.hostname.is_empty() {
                return Err(RoutingError::InvalidHost {
                    host: String::new(),
                    reason: "missing hostname".into(),
                });
            }
            let Some(address) = host.server_address.as_deref() else {
                continue;
            };
            if let Some(first) = seen.insert(address, &host.hostname) {
                return Err(RoutingError::DuplicateServerAddress {
                    address: address.to_string(),
                    first: first.to_string(),
                    second: host.hostname.clone(),
                });
            }
        }
        Ok(())
    }

    fn create_nodes(
        hosts: &[&HostDescription],
    ) -> Result<(Vec<RoutingNode>, HashMap<String, NodeIndex>), RoutingError> {
        let mut nodes = Vec::with_capacity(hosts.len());
        let mut by_name = HashMap::with_capacity(hosts.len());
        for host in hosts {
            if by_name.contains_key(&host.hostname) {
                return Err(RoutingError::DuplicateHost {
                    host: host.hostname.clone(),
                });
            }
            by_name.insert(host.hostname.clone(), NodeIndex(nodes.len()));
            nodes.push(RoutingNode::new(&host.hostname));
        }
        Ok((nodes, by_name))
    }

    fn link_nodes(
        hosts: &[&HostDescription],
        nodes: &mut [RoutingNode],
        by_name: &HashMap<String, NodeIndex>,
    ) -> Result<NodeIndex, RoutingError> {
        let mut root: Option<NodeIndex> = None;

        for (i, host) in hosts.iter().enumerate() {
            let index = NodeIndex(i);
            let Some(connect_to) = host.connect_to.as_deref() else {
                if let Some(existing) = root.filter(|r| *r != index) {
                    return Err(RoutingError::MultipleRoots {
                        first: nodes[existing.0].name.clone(),
                        second: host.hostname.clone(),
                    });
                }
                root = Some(index);
                continue;
            };

            if connect_to == host.hostname {
                return Err(RoutingError::SelfConnection {
                    host: host.hostname.clone(),
                });
            }

            let parent = *by_name
                .get(connect_to)
                .ok_or_else(|| RoutingError::UnknownConnectTarget {
                    host: host.hostname.clone(),
                    target: connect_to.to_string(),
                })?;
            if !hosts[parent.0].is_server() {
                return Err(RoutingError::ConnectTargetNotServer {
                    host: host.hostname.clone(),
                    target: connect_to.to_string(),
                });
            }

            nodes[parent.0].children.push(index);
            nodes[index.0].parent = Some(parent);
        }

        root.ok_or(RoutingError::NoRoot)
    }

    /// Every node must hang below the root; anything else sits on a cycle.
    fn check_connected(tree: &RoutingTree) -> Result<(), RoutingError> {
        let mut reached = vec![false; tree.nodes.len()];
        let mut stack = vec![tree.root];
        while let Some(index) = stack.pop() {
            if reached[index.0] {
                continue;
            }
            reached[index.0] = true;
            stack.extend(tree.node(index).children.iter().copied());
        }
        match reached.iter().position(|r| !r) {
            Some(i) => Err(RoutingError::ConnectionCycle {
                host: tree.nodes[i].name.clone(),
            }),
            None => Ok(()),
        }
    }
}
