//! Per-turn record of visited blocks and their hierarchy.
//!
//! A [`BlockTree`] is built while an agent turn walks the workspace and is
//! rendered back into the agent context as an indented outline. It is plain
//! data with no internal locking: one tree belongs to one turn at a time.
//!
//! # Invariant
//!
//! `children[p]` contains `c` if and only if `parent[c] == p`. Every mutator
//! updates both maps.
//!
//! # Examples
//!
//! ```
//! use blockcache::{Alias, BlockTree};
//!
//! let mut tree = BlockTree::new();
//! tree.add_relationships(Alias::new(1), &[Alias::new(2), Alias::new(3)]);
//! tree.add_relationship(Alias::new(2), Alias::new(4));
//!
//! assert_eq!(
//!     tree.render(),
//!     "1\n├── 2\n│   └── 4\n└── 3"
//! );
//! ```

use super::Alias;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

const EMPTY_TREE: &str = "Empty tree";
const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const CONTINUATION: &str = "│   ";
const SPACER: &str = "    ";

/// Parent/child adjacency of visited aliases.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    parent: BTreeMap<Alias, Alias>,
    children: BTreeMap<Alias, Vec<Alias>>,
}

/// Serializable form of a [`BlockTree`] keyed by alias strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainBlockTree {
    /// Child alias to parent alias.
    #[serde(default)]
    pub parent: BTreeMap<String, String>,
    /// Parent alias to ordered child aliases.
    #[serde(default)]
    pub children: BTreeMap<String, Vec<String>>,
}

impl BlockTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `child` under `parent`.
    ///
    /// A child that already hangs under another parent is moved. Adding an
    /// existing edge is a no-op.
    pub fn add_relationship(&mut self, parent: Alias, child: Alias) {
        if parent == child {
            tracing::debug!(alias = %parent, "Ignoring self-referencing block edge");
            return;
        }

        match self.parent.get(&child) {
            Some(existing) if *existing == parent => {},
            Some(existing) => {
                let existing = *existing;
                self.remove_relationship(existing, child);
            },
            None => {},
        }

        self.parent.insert(child, parent);
        let siblings = self.children.entry(parent).or_default();
        if !siblings.contains(&child) {
            siblings.push(child);
        }
    }

    /// Records every child under `parent`, in order.
    pub fn add_relationships(&mut self, parent: Alias, children: &[Alias]) {
        for child in children {
            self.add_relationship(parent, *child);
        }
    }

    /// Makes `node` part of the tree even without children.
    pub fn add_parent(&mut self, node: Alias) {
        self.children.entry(node).or_default();
    }

    /// Direct children of `node`, in insertion order.
    #[must_use]
    pub fn get_children(&self, node: Alias) -> Vec<Alias> {
        self.children.get(&node).cloned().unwrap_or_default()
    }

    /// Parent of `node`, if recorded.
    #[must_use]
    pub fn get_parent(&self, node: Alias) -> Option<Alias> {
        self.parent.get(&node).copied()
    }

    /// Other children of `node`'s parent.
    #[must_use]
    pub fn get_siblings(&self, node: Alias) -> Vec<Alias> {
        self.get_parent(node)
            .map(|parent| {
                self.get_children(parent)
                    .into_iter()
                    .filter(|sibling| *sibling != node)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ancestors of `node`, nearest first, ending at its root.
    ///
    /// Stops at the first revisited node if the parent links form a cycle.
    #[must_use]
    pub fn get_all_parents(&self, node: Alias) -> Vec<Alias> {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([node]);
        let mut current = node;

        while let Some(parent) = self.get_parent(current) {
            if !seen.insert(parent) {
                tracing::warn!(alias = %node, at = %parent, "Cycle detected in block tree");
                break;
            }
            ancestors.push(parent);
            current = parent;
        }

        ancestors
    }

    /// Every descendant of `node` in breadth-first order.
    #[must_use]
    pub fn get_all_children_recursive(&self, node: Alias) -> Vec<Alias> {
        let mut descendants = Vec::new();
        let mut seen = HashSet::from([node]);
        let mut queue: VecDeque<Alias> = VecDeque::from([node]);

        while let Some(current) = queue.pop_front() {
            for child in self.children.get(&current).into_iter().flatten() {
                if seen.insert(*child) {
                    descendants.push(*child);
                    queue.push_back(*child);
                }
            }
        }

        descendants
    }

    /// Nodes without a parent, in ascending alias order.
    #[must_use]
    pub fn get_roots(&self) -> Vec<Alias> {
        self.nodes()
            .into_iter()
            .filter(|node| !self.parent.contains_key(node))
            .collect()
    }

    /// Every node mentioned in either map.
    fn nodes(&self) -> BTreeSet<Alias> {
        let mut nodes: BTreeSet<Alias> = self.parent.keys().copied().collect();
        nodes.extend(self.parent.values().copied());
        nodes.extend(self.children.keys().copied());
        nodes.extend(self.children.values().flatten().copied());
        nodes
    }

    /// Renders the tree using each alias's number as its label.
    #[must_use]
    pub fn render(&self) -> String {
        self.render_with(|alias| alias.to_string())
    }

    /// Renders the tree depth-first with box-drawing connectors.
    ///
    /// Returns `"Empty tree"` when there are no roots.
    #[must_use]
    pub fn render_with<F>(&self, name_lookup: F) -> String
    where
        F: Fn(Alias) -> String,
    {
        let roots = self.get_roots();
        if roots.is_empty() {
            return EMPTY_TREE.to_string();
        }

        let mut lines = Vec::new();
        let mut seen = HashSet::new();

        for root in roots {
            // (node, prefix for this line, connector, prefix handed to children)
            let mut stack: Vec<(Alias, String, &str, String)> =
                vec![(root, String::new(), "", String::new())];

            while let Some((node, prefix, connector, child_prefix)) = stack.pop() {
                if !seen.insert(node) {
                    continue;
                }
                lines.push(format!("{prefix}{connector}{}", name_lookup(node)));

                let children = self.children.get(&node).map_or(&[][..], Vec::as_slice);
                let last_index = children.len().saturating_sub(1);
                for (index, child) in children.iter().enumerate().rev() {
                    let is_last = index == last_index;
                    let (connector, extension) = if is_last {
                        (LAST_BRANCH, SPACER)
                    } else {
                        (BRANCH, CONTINUATION)
                    };
                    stack.push((
                        *child,
                        child_prefix.clone(),
                        connector,
                        format!("{child_prefix}{extension}"),
                    ));
                }
            }
        }

        lines.join("\n")
    }

    /// Removes the edge between `parent` and `child`.
    ///
    /// Drops `parent` from the children map once its list is empty.
    pub fn remove_relationship(&mut self, parent: Alias, child: Alias) {
        if self.parent.get(&child) == Some(&parent) {
            self.parent.remove(&child);
        }

        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.retain(|c| *c != child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    /// Removes `root` and all of its descendants.
    pub fn remove_subtree(&mut self, root: Alias) {
        if let Some(parent) = self.get_parent(root) {
            self.remove_relationship(parent, root);
        }

        let mut doomed: HashSet<Alias> = self.get_all_children_recursive(root).into_iter().collect();
        doomed.insert(root);

        for node in &doomed {
            self.parent.remove(node);
            self.children.remove(node);
        }

        self.parent.retain(|_, parent| !doomed.contains(parent));
        self.children.retain(|_, siblings| {
            let before = siblings.len();
            siblings.retain(|c| !doomed.contains(c));
            !(siblings.is_empty() && before > 0)
        });
    }

    /// Returns `true` if both maps are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty() && self.children.is_empty()
    }

    /// Converts the tree into string-keyed maps.
    #[must_use]
    pub fn to_plain(&self) -> PlainBlockTree {
        PlainBlockTree {
            parent: self
                .parent
                .iter()
                .map(|(child, parent)| (child.to_string(), parent.to_string()))
                .collect(),
            children: self
                .children
                .iter()
                .map(|(parent, children)| {
                    (
                        parent.to_string(),
                        children.iter().map(ToString::to_string).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Rebuilds a tree from its plain form.
    ///
    /// Any unparseable alias yields an empty tree.
    #[must_use]
    pub fn from_plain(plain: &PlainBlockTree) -> Self {
        Self::try_from_plain(plain).unwrap_or_else(|| {
            tracing::warn!("Malformed block tree structure, starting empty");
            Self::new()
        })
    }

    fn try_from_plain(plain: &PlainBlockTree) -> Option<Self> {
        let mut tree = Self::new();

        for (child, parent) in &plain.parent {
            tree.parent.insert(Alias::parse(child)?, Alias::parse(parent)?);
        }
        for (parent, children) in &plain.children {
            let children = children
                .iter()
                .map(|c| Alias::parse(c))
                .collect::<Option<Vec<_>>>()?;
            tree.children.insert(Alias::parse(parent)?, children);
        }

        Some(tree)
    }

    /// Serializes the tree to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self.to_plain()).unwrap_or(serde_json::Value::Null)
    }

    /// Rebuilds a tree from a JSON value; malformed input yields an empty tree.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value::<PlainBlockTree>(value.clone()).map_or_else(
            |e| {
                tracing::warn!(error = %e, "Malformed block tree value, starting empty");
                Self::new()
            },
            |plain| Self::from_plain(&plain),
        )
    }
}

/// Trees are equal when both maps hold the same edges; child order is ignored.
impl PartialEq for BlockTree {
    fn eq(&self, other: &Self) -> bool {
        self.parent == other.parent
            && self.children.len() == other.children.len()
            && self.children.iter().all(|(parent, children)| {
                other.children.get(parent).is_some_and(|theirs| {
                    children.iter().collect::<BTreeSet<_>>() == theirs.iter().collect()
                })
            })
    }
}

impl Eq for BlockTree {}

impl fmt::Display for BlockTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
