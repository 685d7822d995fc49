//! Method-style builders for recording operations.
//!
//! `graph.matmul(a, b)` is shorthand for
//! `graph.apply_op(Box::new(MatMul), &[a, b])`.

use crate::broadcast::BroadcastAdd;
use crate::graph::{Graph, NodeId};
use crate::linalg::{CayleyTransform, MatrixExp};
use crate::manifold_ops::{RowNormalize, SphereExp};
use crate::ops::{
    Add, Block, BlockDiag, Embed, Exp, Extract, Mask, MatMul, Mean, Multiply, Negate, ReLU, Scale,
    ScaleColumns, Shift, Sigmoid, Sin, Softplus, Square, Sub, Sum, Tanh, Transpose, Tril, Triu,
};
use nalgebra::DMatrix;

impl Graph {
    /// `a + b`.
    pub fn add(&self, a: NodeId, b: NodeId) -> NodeId {
        self.apply_op(Box::new(Add), &[a, b])
    }

    /// `a - b`.
    pub fn sub(&self, a: NodeId, b: NodeId) -> NodeId {
        self.apply_op(Box::new(Sub), &[a, b])
    }

    /// Entry-wise product.
    pub fn mul(&self, a: NodeId, b: NodeId) -> NodeId {
        self.apply_op(Box::new(Multiply), &[a, b])
    }

    /// Batched matrix product.
    pub fn matmul(&self, a: NodeId, b: NodeId) -> NodeId {
        self.apply_op(Box::new(MatMul), &[a, b])
    }

    /// Batched transpose.
    pub fn transpose(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Transpose), &[a])
    }

    /// Sum of every entry, as a scalar node.
    pub fn sum(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Sum), &[a])
    }

    /// Mean of every entry, as a scalar node.
    pub fn mean(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Mean), &[a])
    }

    /// `-a`.
    pub fn neg(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Negate), &[a])
    }

    /// `factor * a`.
    pub fn scale(&self, a: NodeId, factor: f64) -> NodeId {
        self.apply_op(Box::new(Scale::new(factor)), &[a])
    }

    /// `a + offset` entry-wise.
    pub fn shift(&self, a: NodeId, offset: f64) -> NodeId {
        self.apply_op(Box::new(Shift::new(offset)), &[a])
    }

    /// Rectified linear unit.
    pub fn relu(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(ReLU), &[a])
    }

    /// Entry-wise exponential.
    pub fn exp(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Exp), &[a])
    }

    /// Logistic sigmoid.
    pub fn sigmoid(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Sigmoid), &[a])
    }

    /// Hyperbolic tangent.
    pub fn tanh(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Tanh), &[a])
    }

    /// Entry-wise sine.
    pub fn sin(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Sin), &[a])
    }

    /// `ln(1 + e^a)`.
    pub fn softplus(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Softplus), &[a])
    }

    /// Entry-wise square.
    pub fn square(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(Square), &[a])
    }

    /// Entries on and below `diagonal`.
    pub fn tril(&self, a: NodeId, diagonal: isize) -> NodeId {
        self.apply_op(Box::new(Tril::new(diagonal)), &[a])
    }

    /// Entries on and above `diagonal`.
    pub fn triu(&self, a: NodeId, diagonal: isize) -> NodeId {
        self.apply_op(Box::new(Triu::new(diagonal)), &[a])
    }

    /// Entry-wise product with a constant matrix.
    pub fn mask(&self, a: NodeId, mask: DMatrix<f64>) -> NodeId {
        self.apply_op(Box::new(Mask::new(mask)), &[a])
    }

    /// Sub-block of every matrix.
    pub fn extract(&self, a: NodeId, block: Block) -> NodeId {
        self.apply_op(Box::new(Extract::new(block)), &[a])
    }

    /// Places `a` at `block` inside an `nrows x ncols` zero matrix.
    pub fn embed(&self, a: NodeId, block: Block, nrows: usize, ncols: usize) -> NodeId {
        self.apply_op(Box::new(Embed::new(block, nrows, ncols)), &[a])
    }

    /// Block-diagonal matrix built from `blocks`.
    pub fn block_diag(&self, blocks: &[NodeId]) -> NodeId {
        self.apply_op(Box::new(BlockDiag), blocks)
    }

    /// `m * diag(s)` for a column `s`.
    pub fn scale_columns(&self, m: NodeId, s: NodeId) -> NodeId {
        self.apply_op(Box::new(ScaleColumns), &[m, s])
    }

    /// `a + b` with `b` broadcast along rows, columns or the batch.
    pub fn broadcast_add(&self, a: NodeId, b: NodeId) -> NodeId {
        self.apply_op(Box::new(BroadcastAdd), &[a, b])
    }

    /// Matrix exponential.
    pub fn expm(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(MatrixExp), &[a])
    }

    /// Cayley transform `(I + A)⁻¹ (I - A)`.
    pub fn cayley(&self, a: NodeId) -> NodeId {
        self.apply_op(Box::new(CayleyTransform::default()), &[a])
    }

    /// Scales each row to norm `radius`.
    pub fn row_normalize(&self, a: NodeId, radius: f64) -> NodeId {
        self.apply_op(Box::new(RowNormalize::new(radius)), &[a])
    }

    /// Sphere exponential at the unit rows of `base`.
    pub fn sphere_exp(&self, x: NodeId, base: NodeId, radius: f64) -> NodeId {
        self.apply_op(Box::new(SphereExp::new(radius)), &[x, base])
    }
}
