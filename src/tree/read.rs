//! Read-only walks shared by the live tree and historical snapshots.

use std::borrow::Cow;

use crate::error::{IavlError, Result};
use crate::node::{Node, NodeRef};
use crate::types::Hash;

/// Something that can resolve node references for reading.
pub(crate) trait NodeSource {
    fn root(&self) -> Option<NodeRef>;
    fn view(&self, r: &NodeRef) -> Result<Cow<'_, Node>>;
}

fn child(node: &Node, left: bool) -> Result<NodeRef> {
    let r = if left { node.left } else { node.right };
    r.ok_or_else(|| {
        IavlError::consistency(format!(
            "branch {} is missing its {} child",
            location(node),
            if left { "left" } else { "right" }
        ))
    })
}

pub(crate) fn location(node: &Node) -> String {
    node.node_key
        .map(|k| k.to_string())
        .unwrap_or_else(|| format!("working@{}", node.version))
}

pub(crate) fn get(source: &dyn NodeSource, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let Some(mut current) = source.root() else {
        return Ok(None);
    };
    loop {
        let node = source.view(&current)?;
        if node.is_leaf() {
            return Ok((node.key == key).then(|| node.value.clone().unwrap_or_default()));
        }
        current = child(&node, key < node.key.as_slice())?;
    }
}

/// Returns the number of keys smaller than `key` and the value stored under it.
pub(crate) fn get_with_index(source: &dyn NodeSource, key: &[u8]) -> Result<(u64, Option<Vec<u8>>)> {
    let Some(mut current) = source.root() else {
        return Ok((0, None));
    };
    let mut index = 0u64;
    loop {
        let node = source.view(&current)?;
        if node.is_leaf() {
            return Ok(match key.cmp(node.key.as_slice()) {
                std::cmp::Ordering::Equal => (index, node.value.clone()),
                std::cmp::Ordering::Less => (index, None),
                std::cmp::Ordering::Greater => (index + 1, None),
            });
        }
        if key < node.key.as_slice() {
            current = child(&node, true)?;
        } else {
            let left = child(&node, true)?;
            index += source.view(&left)?.size;
            current = child(&node, false)?;
        }
    }
}

pub(crate) fn get_by_index(source: &dyn NodeSource, mut index: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let Some(mut current) = source.root() else {
        return Ok(None);
    };
    if index >= source.view(&current)?.size {
        return Ok(None);
    }
    loop {
        let node = source.view(&current)?;
        if node.is_leaf() {
            return Ok(Some((node.key.clone(), node.value.clone().unwrap_or_default())));
        }
        let left = child(&node, true)?;
        let left_size = source.view(&left)?.size;
        if index < left_size {
            current = left;
        } else {
            index -= left_size;
            current = child(&node, false)?;
        }
    }
}

pub(crate) fn size(source: &dyn NodeSource) -> Result<u64> {
    match source.root() {
        Some(root) => Ok(source.view(&root)?.size),
        None => Ok(0),
    }
}

pub(crate) fn height(source: &dyn NodeSource) -> Result<u8> {
    match source.root() {
        Some(root) => Ok(source.view(&root)?.height),
        None => Ok(0),
    }
}

/// Ordered iterator over `(key, value)` pairs with an inclusive start and
/// exclusive end.
pub struct Range<'a> {
    source: &'a dyn NodeSource,
    stack: Vec<NodeRef>,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    ascending: bool,
}

impl<'a> Range<'a> {
    pub(crate) fn new(
        source: &'a dyn NodeSource,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> Self {
        Self {
            stack: source.root().into_iter().collect(),
            source,
            start: start.map(<[u8]>::to_vec),
            end: end.map(<[u8]>::to_vec),
            ascending,
        }
    }

    fn in_range(&self, key: &[u8]) -> bool {
        self.start.as_deref().map_or(true, |s| key >= s)
            && self.end.as_deref().map_or(true, |e| key < e)
    }
}

impl<'a> Iterator for Range<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = self.source;
        while let Some(r) = self.stack.pop() {
            let node = match source.view(&r) {
                Ok(node) => node,
                Err(err) => {
                    self.stack.clear();
                    return Some(Err(err));
                }
            };
            if node.is_leaf() {
                if self.in_range(&node.key) {
                    return Some(Ok((
                        node.key.clone(),
                        node.value.clone().unwrap_or_default(),
                    )));
                }
                continue;
            }
            // Left keys are < split, right keys are >= split.
            let split = node.key.as_slice();
            let visit_left = self.start.as_deref().map_or(true, |s| split > s);
            let visit_right = self.end.as_deref().map_or(true, |e| split < e);
            let (left, right) = match (node.left, node.right) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    self.stack.clear();
                    return Some(Err(IavlError::consistency(format!(
                        "branch {} is missing a child",
                        location(&node)
                    ))));
                }
            };
            let (first, second) = if self.ascending {
                ((visit_right, right), (visit_left, left))
            } else {
                ((visit_left, left), (visit_right, right))
            };
            for (visit, next) in [first, second] {
                if visit {
                    self.stack.push(next);
                }
            }
        }
        None
    }
}

/// Summary produced by a successful [`verify`] walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyReport {
    /// Root hash recomputed from the leaves up.
    pub root_hash: Hash,
    /// Leaves visited.
    pub leaves: u64,
    /// Branches visited.
    pub branches: u64,
    /// Height of the root.
    pub height: u8,
}

struct Subtree {
    min: Vec<u8>,
    max: Vec<u8>,
    height: u8,
    size: u64,
    hash: Hash,
}

/// Walks every reachable node and checks ordering, balance, size, and hash
/// integrity.
pub(crate) fn verify(source: &dyn NodeSource) -> Result<VerifyReport> {
    let mut report = VerifyReport {
        root_hash: Hash::empty(),
        leaves: 0,
        branches: 0,
        height: 0,
    };
    if let Some(root) = source.root() {
        let sub = check(source, &root, &mut report)?;
        report.root_hash = sub.hash;
        report.height = sub.height;
    }
    Ok(report)
}

fn check(source: &dyn NodeSource, r: &NodeRef, report: &mut VerifyReport) -> Result<Subtree> {
    let node = source.view(r)?;
    let at = location(&node);
    if node.is_leaf() {
        report.leaves += 1;
        let value = match (&node.value, node.left, node.right) {
            (Some(value), None, None) => value,
            _ => {
                return Err(IavlError::consistency(format!(
                    "leaf {at} must hold a value and no children"
                )))
            }
        };
        if node.size != 1 {
            return Err(IavlError::consistency(format!("leaf {at} has size {}", node.size)));
        }
        let hash = Node::leaf_hash(&node.key, value);
        compare_hash(&node, &at, hash)?;
        return Ok(Subtree {
            min: node.key.clone(),
            max: node.key.clone(),
            height: 0,
            size: 1,
            hash,
        });
    }
    report.branches += 1;
    if node.value.is_some() {
        return Err(IavlError::consistency(format!("branch {at} holds a value")));
    }
    let left = check(source, &child(&node, true)?, report)?;
    let right = check(source, &child(&node, false)?, report)?;
    if left.max.as_slice() >= node.key.as_slice() {
        return Err(IavlError::consistency(format!(
            "branch {at}: left subtree reaches past the split key"
        )));
    }
    if right.min != node.key {
        return Err(IavlError::consistency(format!(
            "branch {at}: split key is not the smallest key on the right"
        )));
    }
    let height = 1 + left.height.max(right.height);
    if node.height != height {
        return Err(IavlError::consistency(format!(
            "branch {at}: height {} expected {height}",
            node.height
        )));
    }
    if (left.height as i16 - right.height as i16).abs() > 1 {
        return Err(IavlError::consistency(format!(
            "branch {at}: unbalanced ({} vs {})",
            left.height, right.height
        )));
    }
    if node.size != left.size + right.size {
        return Err(IavlError::consistency(format!(
            "branch {at}: size {} expected {}",
            node.size,
            left.size + right.size
        )));
    }
    let hash = Node::branch_hash(height, node.size, &left.hash, &right.hash);
    compare_hash(&node, &at, hash)?;
    Ok(Subtree {
        min: left.min,
        max: right.max,
        height,
        size: node.size,
        hash,
    })
}

fn compare_hash(node: &Node, at: &str, computed: Hash) -> Result<()> {
    match node.hash() {
        Some(cached) if cached != computed => Err(IavlError::consistency(format!(
            "node {at}: cached hash {cached} != computed {computed}"
        ))),
        _ => Ok(()),
    }
}
