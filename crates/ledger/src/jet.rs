use crate::Error;
use models::{JetId, PulseNumber, HASH_SIZE};
use std::collections::HashMap;
use std::sync::Mutex;

/// One node of a pulse's prefix tree. Leaves are the live jets; `actual`
/// marks a leaf whose assignment the next executor has confirmed (a split is
/// pending until then).
#[derive(Clone, Default, Debug)]
struct TreeNode {
    actual: bool,
    left: Option<Box<TreeNode>>,
    right: Option<Box<TreeNode>>,
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    fn leaves(&self, prefix: JetId, out: &mut Vec<JetId>) {
        if self.is_leaf() {
            out.push(prefix);
            return;
        }
        let (left, right) = prefix.split();
        if let Some(node) = &self.left {
            node.leaves(left, out);
        }
        if let Some(node) = &self.right {
            node.leaves(right, out);
        }
    }

    // Walk one bit of the path, immutably.
    fn child(&self, right: bool) -> Option<&TreeNode> {
        let child = if right { &self.right } else { &self.left };
        child.as_deref()
    }

    // Walk one bit of the path, materializing both children so the leaf
    // cover stays complete when a path is extended.
    fn child_mut(&mut self, right: bool) -> &mut TreeNode {
        self.left.get_or_insert_with(Default::default);
        self.right.get_or_insert_with(Default::default);
        let child = if right { &mut self.right } else { &mut self.left };
        child.as_mut().unwrap()
    }
}

fn hash_bit(hash: &[u8; HASH_SIZE], i: u8) -> bool {
    hash[i as usize / 8] & (0x80 >> (i % 8)) != 0
}

/// The jet prefix tree of each pulse.
///
/// At any pulse the leaves form a complete prefix cover: every record hash
/// routes to exactly one leaf. A pulse tick clones the closing pulse's tree
/// first and then splits or re-confirms leaves on the clone.
#[derive(Default)]
pub struct JetStorage {
    trees: Mutex<HashMap<PulseNumber, TreeNode>>,
}

impl JetStorage {
    pub fn new() -> JetStorage {
        JetStorage::default()
    }

    /// All leaves at `pn`. An untouched pulse holds the empty jet alone.
    pub fn all(&self, pn: PulseNumber) -> Vec<JetId> {
        let trees = self.trees.lock().unwrap();
        let mut out = Vec::new();
        match trees.get(&pn) {
            Some(root) => root.leaves(JetId::EMPTY, &mut out),
            None => out.push(JetId::EMPTY),
        }
        out
    }

    /// The leaf containing `hash` at `pn`.
    pub fn jet_for(&self, pn: PulseNumber, hash: &[u8; HASH_SIZE]) -> JetId {
        let trees = self.trees.lock().unwrap();
        let Some(mut node) = trees.get(&pn) else {
            return JetId::EMPTY;
        };

        let mut jet = JetId::EMPTY;
        while !node.is_leaf() {
            let right = hash_bit(hash, jet.depth());
            let (left_jet, right_jet) = jet.split();
            match node.child(right) {
                Some(child) => {
                    node = child;
                    jet = if right { right_jet } else { left_jet };
                }
                None => break,
            }
        }
        jet
    }

    /// Copy the tree of `from` to `to`, clearing every `actual` flag on the
    /// copy: assignments must be re-confirmed for the new pulse.
    pub fn clone_tree(&self, from: PulseNumber, to: PulseNumber) {
        let mut trees = self.trees.lock().unwrap();
        let mut cloned = trees.get(&from).cloned().unwrap_or_default();
        clear_actual(&mut cloned);
        trees.insert(to, cloned);
    }

    /// Replace the leaf `jet` with its two children. Fails when `jet` is not
    /// a leaf of the pulse's tree.
    pub fn split(&self, pn: PulseNumber, jet: JetId) -> Result<(JetId, JetId), Error> {
        let mut trees = self.trees.lock().unwrap();
        let root = trees.entry(pn).or_default();

        let mut node = root;
        for i in 0..jet.depth() {
            let right = hash_bit(jet.prefix(), i);
            let child = if right { &mut node.right } else { &mut node.left };
            node = match child {
                Some(child) => &mut **child,
                None => return Err(Error::JetNotFound(jet, pn)),
            };
        }
        if !node.is_leaf() {
            return Err(Error::JetNotFound(jet, pn));
        }

        node.left = Some(Box::default());
        node.right = Some(Box::default());
        Ok(jet.split())
    }

    /// Mark leaves as live (`actual = true`) or pending assignments,
    /// creating their path as needed.
    pub fn update(&self, pn: PulseNumber, actual: bool, jets: &[JetId]) {
        let mut trees = self.trees.lock().unwrap();
        let root = trees.entry(pn).or_default();

        for jet in jets {
            let mut node = &mut *root;
            for i in 0..jet.depth() {
                node = node.child_mut(hash_bit(jet.prefix(), i));
            }
            node.actual = actual;
        }
    }

    pub fn delete(&self, pn: PulseNumber) {
        self.trees.lock().unwrap().remove(&pn);
    }
}

fn clear_actual(node: &mut TreeNode) {
    node.actual = false;
    for child in [&mut node.left, &mut node.right] {
        if let Some(child) = child {
            clear_actual(child);
        }
    }
}
