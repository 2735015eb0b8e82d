//! Splay tree keyed by address
//!
//! Self-adjusting binary search tree with top-down splaying. Every lookup moves
//! the accessed node (or its nearest neighbour) to the root, so the hot code
//! ranges hit by consecutive ticks stay near the top.
//!
//! Deep trees are common (code is usually allocated at increasing addresses),
//! so splaying, export and drop are all iterative.

use std::cmp::Ordering;
use std::fmt::Debug;
use thiserror::Error;

/// Errors produced by tree mutations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplayTreeError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
}

/// Result type for splay tree operations
pub type Result<T> = std::result::Result<T, SplayTreeError>;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    left: Option<Box<Node<K, V>>>,
    right: Option<Box<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
    fn new(key: K, value: V) -> Box<Self> {
        Box::new(Self {
            key,
            value,
            left: None,
            right: None,
        })
    }
}

/// Ordered map with amortized O(log n) access
#[derive(Debug)]
pub struct SplayTree<K, V> {
    root: Option<Box<Node<K, V>>>,
    len: usize,
}

impl<K, V> Default for SplayTree<K, V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<K: Ord + Copy + Debug, V> SplayTree<K, V> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert a value, replacing the value already stored under `key`
    pub fn insert(&mut self, key: K, value: V) {
        if self.root.is_none() {
            self.root = Some(Node::new(key, value));
            self.len = 1;
            return;
        }

        self.splay(key);
        let Some(mut root) = self.root.take() else {
            return;
        };

        if root.key == key {
            root.value = value;
            self.root = Some(root);
            return;
        }

        let mut node = Node::new(key, value);
        if key > root.key {
            node.right = root.right.take();
            node.left = Some(root);
        } else {
            node.left = root.left.take();
            node.right = Some(root);
        }
        self.root = Some(node);
        self.len += 1;
    }

    /// Remove `key` and return its value
    pub fn remove(&mut self, key: K) -> Result<V> {
        if self.root.is_none() {
            return Err(SplayTreeError::KeyNotFound(format!("{key:?}")));
        }

        self.splay(key);
        match self.root.take() {
            Some(root) if root.key == key => {
                let node = *root;
                match node.left {
                    None => self.root = node.right,
                    Some(left) => {
                        // Every key on the left is smaller, so splaying for
                        // `key` lifts the left maximum, which has no right child.
                        self.root = Some(left);
                        self.splay(key);
                        if let Some(new_root) = self.root.as_mut() {
                            new_root.right = node.right;
                        }
                    }
                }
                self.len -= 1;
                Ok(node.value)
            }
            other => {
                self.root = other;
                Err(SplayTreeError::KeyNotFound(format!("{key:?}")))
            }
        }
    }

    /// Look up the value stored under exactly `key`
    pub fn find(&mut self, key: K) -> Option<&V> {
        self.splay(key);
        self.root
            .as_ref()
            .filter(|root| root.key == key)
            .map(|root| &root.value)
    }

    /// Whether `key` is present
    pub fn contains(&mut self, key: K) -> bool {
        self.find(key).is_some()
    }

    /// Smallest key and its value
    pub fn find_min(&self) -> Option<(K, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(left) = node.left.as_ref() {
            node = left;
        }
        Some((node.key, &node.value))
    }

    /// Largest key and its value
    pub fn find_max(&self) -> Option<(K, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(right) = node.right.as_ref() {
            node = right;
        }
        Some((node.key, &node.value))
    }

    /// Greatest key that is less than or equal to `key`
    pub fn find_greatest_less_than(&mut self, key: K) -> Option<(K, &V)> {
        self.splay(key);
        let root = self.root.as_ref()?;
        if root.key <= key {
            return Some((root.key, &root.value));
        }
        let mut node = root.left.as_ref()?;
        while let Some(right) = node.right.as_ref() {
            node = right;
        }
        Some((node.key, &node.value))
    }

    /// All entries in ascending key order
    pub fn export_keys_and_values(&self) -> Vec<(K, &V)> {
        let mut result = Vec::with_capacity(self.len);
        let mut stack: Vec<&Node<K, V>> = Vec::new();
        let mut current = self.root.as_deref();
        loop {
            while let Some(node) = current {
                stack.push(node);
                current = node.left.as_deref();
            }
            let Some(node) = stack.pop() else {
                break;
            };
            result.push((node.key, &node.value));
            current = node.right.as_deref();
        }
        result
    }

    /// All values in ascending key order
    pub fn export_values(&self) -> Vec<&V> {
        self.export_keys_and_values()
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    /// All keys in ascending order
    pub fn export_keys(&self) -> Vec<K> {
        self.export_keys_and_values()
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    /// Top-down splay: afterwards the root holds `key`, or the last node
    /// visited on the search path for it.
    fn splay(&mut self, key: K) {
        let Some(mut current) = self.root.take() else {
            return;
        };

        // Nodes smaller than `key`; each one's right child is still to be linked.
        let mut smaller: Vec<Box<Node<K, V>>> = Vec::new();
        // Nodes larger than `key`; each one's left child is still to be linked.
        let mut larger: Vec<Box<Node<K, V>>> = Vec::new();

        loop {
            match key.cmp(&current.key) {
                Ordering::Less => {
                    let Some(mut child) = current.left.take() else {
                        break;
                    };
                    if key < child.key {
                        current.left = child.right.take();
                        child.right = Some(current);
                        current = child;
                        let Some(next) = current.left.take() else {
                            break;
                        };
                        larger.push(current);
                        current = next;
                    } else {
                        larger.push(current);
                        current = child;
                    }
                }
                Ordering::Greater => {
                    let Some(mut child) = current.right.take() else {
                        break;
                    };
                    if key > child.key {
                        current.right = child.left.take();
                        child.left = Some(current);
                        current = child;
                        let Some(next) = current.right.take() else {
                            break;
                        };
                        smaller.push(current);
                        current = next;
                    } else {
                        smaller.push(current);
                        current = child;
                    }
                }
                Ordering::Equal => break,
            }
        }

        let mut left = current.left.take();
        while let Some(mut node) = smaller.pop() {
            node.right = left;
            left = Some(node);
        }
        let mut right = current.right.take();
        while let Some(mut node) = larger.pop() {
            node.left = right;
            right = Some(node);
        }
        current.left = left;
        current.right = right;
        self.root = Some(current);
    }
}

impl<K, V> Drop for SplayTree<K, V> {
    fn drop(&mut self) {
        let mut stack: Vec<Box<Node<K, V>>> = self.root.take().into_iter().collect();
        while let Some(mut node) = stack.pop() {
            stack.extend(node.left.take());
            stack.extend(node.right.take());
        }
    }
}
