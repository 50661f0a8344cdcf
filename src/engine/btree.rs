//! In-memory B-tree secondary index.
//!
//! Maps a field value to the full row payloads carrying that value.
//! Indexes are rebuilt from the heap on demand and never persisted;
//! they live exactly as long as the engine that owns them.

use serde::Serialize;
use std::cmp::Ordering;

use super::{Row, Value};

/// Default fan-out used when building an index.
pub const DEFAULT_ORDER: usize = 32;

/// One tree node. Leaves carry `values` aligned 1:1 with `keys`;
/// internal nodes carry `keys.len() + 1` children and no values.
#[derive(Debug, Clone)]
struct Node {
    leaf: bool,
    keys: Vec<Value>,
    values: Vec<Row>,
    children: Vec<Node>,
}

impl Node {
    fn new(leaf: bool) -> Self {
        Self {
            leaf,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Shape summary of an index, reported by `SHOW INDEXES`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub name: String,
    pub key_field: String,
    pub node_count: usize,
    pub leaf_count: usize,
    pub key_count: usize,
    pub max_depth: usize,
    pub order: usize,
}

/// An order-N multiway tree over row values.
///
/// Keys within a node are non-decreasing under the engine's
/// polymorphic comparison, and duplicate keys are allowed: inserts
/// land after existing equal keys, so equal-key payloads keep their
/// insertion order.
///
/// One inherited quirk is deliberately preserved: a split promotes
/// the middle key into the parent but drops its payload, and point
/// lookups that hit an equal key in an internal node steer right
/// rather than stopping. A key that has been promoted is therefore
/// not reachable through `search`. The tests pin this behavior down.
pub struct BTreeIndex {
    order: usize,
    root: Node,
    pub name: String,
    pub key_field: String,
}

impl BTreeIndex {
    pub fn new(order: usize, name: String, key_field: String) -> Self {
        let order = if order == 0 { DEFAULT_ORDER } else { order };
        Self {
            order,
            root: Node::new(true),
            name,
            key_field,
        }
    }

    /// Inserts a key and its row payload.
    pub fn insert(&mut self, key: Value, value: Row) {
        if self.root.keys.len() >= self.order {
            let old_root = std::mem::replace(&mut self.root, Node::new(false));
            self.root.children.push(old_root);
            Self::split_child(self.order, &mut self.root, 0);
        }
        Self::insert_non_full(self.order, &mut self.root, key, value);
    }

    fn insert_non_full(order: usize, node: &mut Node, key: Value, value: Row) {
        // First slot from the right whose key is <= the new key; equal
        // keys end up to the left, so duplicates append after them.
        let mut i = node.keys.len();
        while i > 0 && key.compare(&node.keys[i - 1]) == Ordering::Less {
            i -= 1;
        }

        if node.leaf {
            node.keys.insert(i, key);
            node.values.insert(i, value);
            return;
        }

        if node.children[i].keys.len() >= order {
            Self::split_child(order, node, i);
            // The split promoted a key into slot i; equal steers right.
            if key.compare(&node.keys[i]) != Ordering::Less {
                i += 1;
            }
        }
        Self::insert_non_full(order, &mut node.children[i], key, value);
    }

    /// Splits the full child at `index`, promoting its middle key into
    /// `parent`. The promoted key's payload is not kept anywhere.
    fn split_child(order: usize, parent: &mut Node, index: usize) {
        let mid = order / 2;
        let (promoted, right) = {
            let full = &mut parent.children[index];
            let mut right = Node::new(full.leaf);

            right.keys = full.keys.split_off(mid);
            let promoted = right.keys.remove(0);

            if full.leaf {
                right.values = full.values.split_off(mid);
                right.values.remove(0); // payload of the promoted key is dropped
            } else {
                right.children = full.children.split_off(mid + 1);
            }
            (promoted, right)
        };

        parent.keys.insert(index, promoted);
        parent.children.insert(index + 1, right);
    }

    /// Point lookup. Returns the payload at the first equal position
    /// in the leaf it descends into, or an empty vec if absent.
    pub fn search(&self, key: &Value) -> Vec<Row> {
        Self::search_node(&self.root, key)
    }

    fn search_node(node: &Node, key: &Value) -> Vec<Row> {
        let mut i = 0;
        while i < node.keys.len() && key.compare(&node.keys[i]) == Ordering::Greater {
            i += 1;
        }

        if i < node.keys.len() && key.compare(&node.keys[i]) == Ordering::Equal {
            if node.leaf {
                return vec![node.values[i].clone()];
            }
            // Equal keys steer right; internal nodes hold no payloads.
            return Self::search_node(&node.children[i + 1], key);
        }

        if node.leaf {
            return Vec::new();
        }
        Self::search_node(&node.children[i], key)
    }

    /// Returns every payload whose key lies in `[min, max]`, in key order.
    pub fn range(&self, min: &Value, max: &Value) -> Vec<Row> {
        let mut results = Vec::new();
        Self::range_node(&self.root, min, max, &mut results);
        results
    }

    fn range_node(node: &Node, min: &Value, max: &Value, results: &mut Vec<Row>) {
        if node.leaf {
            for (key, value) in node.keys.iter().zip(&node.values) {
                if key.compare(min) != Ordering::Less && key.compare(max) != Ordering::Greater {
                    results.push(value.clone());
                }
            }
            return;
        }
        for i in 0..node.keys.len() {
            if node.keys[i].compare(min) != Ordering::Less {
                Self::range_node(&node.children[i], min, max, results);
            }
        }
        if let Some(last) = node.children.last() {
            Self::range_node(last, min, max, results);
        }
    }

    /// Walks the whole tree and reports its shape.
    pub fn stats(&self) -> IndexStats {
        fn traverse(node: &Node, depth: usize, stats: &mut IndexStats) {
            stats.node_count += 1;
            stats.key_count += node.keys.len();
            stats.max_depth = stats.max_depth.max(depth);
            if node.leaf {
                stats.leaf_count += 1;
            } else {
                for child in &node.children {
                    traverse(child, depth + 1, stats);
                }
            }
        }

        let mut stats = IndexStats {
            name: self.name.clone(),
            key_field: self.key_field.clone(),
            node_count: 0,
            leaf_count: 0,
            key_count: 0,
            max_depth: 0,
            order: self.order,
        };
        traverse(&self.root, 0, &mut stats);
        stats
    }

    /// Empties the index back to a single leaf. Used by rebuilds.
    pub fn clear(&mut self) {
        self.root = Node::new(true);
    }
}
