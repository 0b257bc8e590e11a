//! AVL rebalancing over working copies.
//!
//! Rotations keep every split key: a rotated node's right subtree keeps the
//! same minimum, so no key needs to move.

use super::Tree;
use crate::error::Result;
use crate::node::{Node, NodeRef};

impl Tree {
    fn balance_factor(&mut self, node: &Node) -> Result<i16> {
        let (left, right) = (self.child(node, true)?, self.child(node, false)?);
        let (lh, _) = self.shape(left)?;
        let (rh, _) = self.shape(right)?;
        Ok(lh as i16 - rh as i16)
    }

    /// Restores the AVL property on a working branch whose children are
    /// already balanced. Shape fields must be current.
    pub(super) fn balance(&mut self, mut node: Node) -> Result<Node> {
        let factor = self.balance_factor(&node)?;
        if factor > 1 {
            let left = self.child(&node, true)?;
            if self.factor_of(left)? < 0 {
                let left = self.take_for_write(left)?;
                let rotated = self.rotate_left(left)?;
                node.left = Some(self.alloc(rotated));
            }
            return self.rotate_right(node);
        }
        if factor < -1 {
            let right = self.child(&node, false)?;
            if self.factor_of(right)? > 0 {
                let right = self.take_for_write(right)?;
                let rotated = self.rotate_right(right)?;
                node.right = Some(self.alloc(rotated));
            }
            return self.rotate_left(node);
        }
        Ok(node)
    }

    fn factor_of(&mut self, r: NodeRef) -> Result<i16> {
        let id = self.fetch(r)?;
        let (left, right) = {
            let node = self.pool.resolve(id)?;
            if node.is_leaf() {
                return Ok(0);
            }
            (self.child(node, true)?, self.child(node, false)?)
        };
        let (lh, _) = self.shape(left)?;
        let (rh, _) = self.shape(right)?;
        Ok(lh as i16 - rh as i16)
    }

    /// Lifts the left child of `node` into its place.
    fn rotate_right(&mut self, mut node: Node) -> Result<Node> {
        let left = self.child(&node, true)?;
        let mut pivot = self.take_for_write(left)?;
        node.left = pivot.right.take();
        self.update_shape(&mut node)?;
        pivot.right = Some(self.alloc(node));
        self.update_shape(&mut pivot)?;
        Ok(pivot)
    }

    /// Lifts the right child of `node` into its place.
    fn rotate_left(&mut self, mut node: Node) -> Result<Node> {
        let right = self.child(&node, false)?;
        let mut pivot = self.take_for_write(right)?;
        node.right = pivot.left.take();
        self.update_shape(&mut node)?;
        pivot.left = Some(self.alloc(node));
        self.update_shape(&mut pivot)?;
        Ok(pivot)
    }
}
