//! Operations for the computation graph.
//!
//! Every operation acts matrix by matrix on batched tensors. Inputs of a
//! binary operation must share their batch shape.

use crate::tensor::Tensor;
use nalgebra::DMatrix;
use std::fmt::Debug;

/// Trait for operations in the computation graph.
pub trait Op: Debug {
    /// Performs the forward computation.
    fn forward(&self, inputs: &[&Tensor]) -> Tensor;

    /// Computes the gradient with respect to each input.
    ///
    /// # Arguments
    /// * `grad_output` - The gradient flowing from the output
    /// * `inputs` - The input values used in the forward pass
    /// * `output` - The output value from the forward pass
    ///
    /// # Returns
    /// A vector of gradients, one for each input
    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], output: &Tensor) -> Vec<Tensor>;

    /// Returns the name of this operation.
    fn name(&self) -> &str;
}

/// Element-wise addition operation.
#[derive(Debug, Clone)]
pub struct Add;

impl Op for Add {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 2, "Add requires exactly 2 inputs");
        inputs[0] + inputs[1]
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone(), grad_output.clone()]
    }

    fn name(&self) -> &str {
        "Add"
    }
}

/// Element-wise subtraction operation.
#[derive(Debug, Clone)]
pub struct Sub;

impl Op for Sub {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 2, "Sub requires exactly 2 inputs");
        inputs[0] - inputs[1]
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone(), -grad_output]
    }

    fn name(&self) -> &str {
        "Sub"
    }
}

/// Element-wise multiplication operation.
#[derive(Debug, Clone)]
pub struct Multiply;

impl Op for Multiply {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 2, "Multiply requires exactly 2 inputs");
        inputs[0].component_mul(inputs[1])
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![
            grad_output.component_mul(inputs[1]),
            grad_output.component_mul(inputs[0]),
        ]
    }

    fn name(&self) -> &str {
        "Multiply"
    }
}

/// Matrix multiplication operation.
#[derive(Debug, Clone)]
pub struct MatMul;

impl Op for MatMul {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 2, "MatMul requires exactly 2 inputs");
        assert_eq!(
            inputs[0].ncols(),
            inputs[1].nrows(),
            "MatMul inner dimensions differ"
        );
        inputs[0] * inputs[1]
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        // d/dA (A * B) = G * B^T
        // d/dB (A * B) = A^T * G
        vec![
            grad_output.zip_map(inputs[1], |g, b| g * b.transpose()),
            inputs[0].zip_map(grad_output, |a, g| a.tr_mul(g)),
        ]
    }

    fn name(&self) -> &str {
        "MatMul"
    }
}

/// Matrix transpose operation.
#[derive(Debug, Clone)]
pub struct Transpose;

impl Op for Transpose {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Transpose requires exactly 1 input");
        inputs[0].transpose()
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.transpose()]
    }

    fn name(&self) -> &str {
        "Transpose"
    }
}

/// Sum of every entry over the whole batch, as a `1 x 1` scalar.
#[derive(Debug, Clone)]
pub struct Sum;

impl Op for Sum {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Sum requires exactly 1 input");
        Tensor::scalar(inputs[0].sum())
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::from_element(
            &inputs[0].shape(),
            grad_output.to_scalar(),
        )]
    }

    fn name(&self) -> &str {
        "Sum"
    }
}

/// Mean of every entry over the whole batch.
#[derive(Debug, Clone)]
pub struct Mean;

fn entry_count(t: &Tensor) -> f64 {
    (t.batch_len() * t.nrows() * t.ncols()) as f64
}

impl Op for Mean {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Mean requires exactly 1 input");
        Tensor::scalar(inputs[0].sum() / entry_count(inputs[0]))
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        let n = entry_count(inputs[0]);
        vec![Tensor::from_element(
            &inputs[0].shape(),
            grad_output.to_scalar() / n,
        )]
    }

    fn name(&self) -> &str {
        "Mean"
    }
}

/// Negation operation.
#[derive(Debug, Clone)]
pub struct Negate;

impl Op for Negate {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Negate requires exactly 1 input");
        -inputs[0]
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![-grad_output]
    }

    fn name(&self) -> &str {
        "Negate"
    }
}

/// Multiplication by a constant.
#[derive(Debug, Clone)]
pub struct Scale {
    /// The constant factor
    pub factor: f64,
}

impl Scale {
    /// Creates a scaling by `factor`.
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Op for Scale {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Scale requires exactly 1 input");
        inputs[0].scale(self.factor)
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.scale(self.factor)]
    }

    fn name(&self) -> &str {
        "Scale"
    }
}

/// Addition of a constant to every entry.
#[derive(Debug, Clone)]
pub struct Shift {
    /// The constant offset
    pub offset: f64,
}

impl Shift {
    /// Creates a shift by `offset`.
    pub fn new(offset: f64) -> Self {
        Self { offset }
    }
}

impl Op for Shift {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Shift requires exactly 1 input");
        let offset = self.offset;
        inputs[0].map_elements(move |x| x + offset)
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone()]
    }

    fn name(&self) -> &str {
        "Shift"
    }
}

/// ReLU (Rectified Linear Unit) activation.
#[derive(Debug, Clone)]
pub struct ReLU;

impl Op for ReLU {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "ReLU requires exactly 1 input");
        inputs[0].map_elements(|x| x.max(0.0))
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        let mask = inputs[0].map_elements(|x| if x > 0.0 { 1.0 } else { 0.0 });
        vec![grad_output.component_mul(&mask)]
    }

    fn name(&self) -> &str {
        "ReLU"
    }
}

/// Element-wise exponential.
#[derive(Debug, Clone)]
pub struct Exp;

impl Op for Exp {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Exp requires exactly 1 input");
        inputs[0].map_elements(f64::exp)
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.component_mul(output)]
    }

    fn name(&self) -> &str {
        "Exp"
    }
}

/// Logistic sigmoid.
#[derive(Debug, Clone)]
pub struct Sigmoid;

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl Op for Sigmoid {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Sigmoid requires exactly 1 input");
        inputs[0].map_elements(sigmoid)
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], output: &Tensor) -> Vec<Tensor> {
        let local = output.map_elements(|s| s * (1.0 - s));
        vec![grad_output.component_mul(&local)]
    }

    fn name(&self) -> &str {
        "Sigmoid"
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone)]
pub struct Tanh;

impl Op for Tanh {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Tanh requires exactly 1 input");
        inputs[0].map_elements(f64::tanh)
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], output: &Tensor) -> Vec<Tensor> {
        let local = output.map_elements(|t| 1.0 - t * t);
        vec![grad_output.component_mul(&local)]
    }

    fn name(&self) -> &str {
        "Tanh"
    }
}

/// Element-wise sine.
#[derive(Debug, Clone)]
pub struct Sin;

impl Op for Sin {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Sin requires exactly 1 input");
        inputs[0].map_elements(f64::sin)
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.component_mul(&inputs[0].map_elements(f64::cos))]
    }

    fn name(&self) -> &str {
        "Sin"
    }
}

/// `ln(1 + e^x)`, evaluated without overflow.
#[derive(Debug, Clone)]
pub struct Softplus;

pub(crate) fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

impl Op for Softplus {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Softplus requires exactly 1 input");
        inputs[0].map_elements(softplus)
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.component_mul(&inputs[0].map_elements(sigmoid))]
    }

    fn name(&self) -> &str {
        "Softplus"
    }
}

/// Element-wise square.
#[derive(Debug, Clone)]
pub struct Square;

impl Op for Square {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Square requires exactly 1 input");
        inputs[0].map_elements(|x| x * x)
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.component_mul(&inputs[0].scale(2.0))]
    }

    fn name(&self) -> &str {
        "Square"
    }
}

fn keep_band(m: &DMatrix<f64>, keep: impl Fn(isize) -> bool) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| {
        if keep(j as isize - i as isize) {
            m[(i, j)]
        } else {
            0.0
        }
    })
}

/// Lower triangle: keeps entries with `j - i <= diagonal`.
#[derive(Debug, Clone)]
pub struct Tril {
    /// Offset of the last kept diagonal
    pub diagonal: isize,
}

impl Tril {
    /// Keeps entries on and below the given diagonal.
    pub fn new(diagonal: isize) -> Self {
        Self { diagonal }
    }

    fn apply(&self, t: &Tensor) -> Tensor {
        let d = self.diagonal;
        t.map(|m| keep_band(m, |offset| offset <= d))
    }
}

impl Op for Tril {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Tril requires exactly 1 input");
        self.apply(inputs[0])
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![self.apply(grad_output)]
    }

    fn name(&self) -> &str {
        "Tril"
    }
}

/// Upper triangle: keeps entries with `j - i >= diagonal`.
#[derive(Debug, Clone)]
pub struct Triu {
    /// Offset of the first kept diagonal
    pub diagonal: isize,
}

impl Triu {
    /// Keeps entries on and above the given diagonal.
    pub fn new(diagonal: isize) -> Self {
        Self { diagonal }
    }

    fn apply(&self, t: &Tensor) -> Tensor {
        let d = self.diagonal;
        t.map(|m| keep_band(m, |offset| offset >= d))
    }
}

impl Op for Triu {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Triu requires exactly 1 input");
        self.apply(inputs[0])
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![self.apply(grad_output)]
    }

    fn name(&self) -> &str {
        "Triu"
    }
}

/// Entry-wise product with a constant matrix, applied to every batch entry.
#[derive(Debug, Clone)]
pub struct Mask {
    /// The constant factor matrix
    pub mask: DMatrix<f64>,
}

impl Mask {
    /// Creates a mask op.
    pub fn new(mask: DMatrix<f64>) -> Self {
        Self { mask }
    }

    fn apply(&self, t: &Tensor) -> Tensor {
        assert_eq!(
            (t.nrows(), t.ncols()),
            self.mask.shape(),
            "Mask shape differs from its input"
        );
        t.map(|m| m.component_mul(&self.mask))
    }
}

impl Op for Mask {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Mask requires exactly 1 input");
        self.apply(inputs[0])
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![self.apply(grad_output)]
    }

    fn name(&self) -> &str {
        "Mask"
    }
}

/// Rectangular window of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// First row
    pub row: usize,
    /// First column
    pub col: usize,
    /// Number of rows
    pub rows: usize,
    /// Number of columns
    pub cols: usize,
}

impl Block {
    /// Creates a block starting at `(row, col)` of size `rows x cols`.
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self {
            row,
            col,
            rows,
            cols,
        }
    }

    fn extract(&self, t: &Tensor) -> Tensor {
        assert!(
            self.row + self.rows <= t.nrows() && self.col + self.cols <= t.ncols(),
            "block {:?} exceeds a {}x{} matrix",
            self,
            t.nrows(),
            t.ncols()
        );
        t.map(|m| {
            m.view((self.row, self.col), (self.rows, self.cols))
                .into_owned()
        })
    }

    fn embed(&self, t: &Tensor, nrows: usize, ncols: usize) -> Tensor {
        assert_eq!(
            (t.nrows(), t.ncols()),
            (self.rows, self.cols),
            "embedded matrix does not match its block"
        );
        assert!(
            self.row + self.rows <= nrows && self.col + self.cols <= ncols,
            "block {:?} exceeds a {nrows}x{ncols} matrix",
            self
        );
        t.map(|m| {
            let mut out = DMatrix::zeros(nrows, ncols);
            out.view_mut((self.row, self.col), (self.rows, self.cols))
                .copy_from(m);
            out
        })
    }
}

/// Extracts a block of every matrix.
#[derive(Debug, Clone)]
pub struct Extract {
    /// The extracted window
    pub block: Block,
}

impl Extract {
    /// Creates an extraction of `block`.
    pub fn new(block: Block) -> Self {
        Self { block }
    }
}

impl Op for Extract {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Extract requires exactly 1 input");
        self.block.extract(inputs[0])
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![self
            .block
            .embed(grad_output, inputs[0].nrows(), inputs[0].ncols())]
    }

    fn name(&self) -> &str {
        "Extract"
    }
}

/// Places every matrix as a block of a larger zero matrix.
#[derive(Debug, Clone)]
pub struct Embed {
    /// Target window
    pub block: Block,
    /// Rows of the output
    pub nrows: usize,
    /// Columns of the output
    pub ncols: usize,
}

impl Embed {
    /// Embeds into an `nrows x ncols` zero matrix at `block`.
    pub fn new(block: Block, nrows: usize, ncols: usize) -> Self {
        Self {
            block,
            nrows,
            ncols,
        }
    }
}

impl Op for Embed {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "Embed requires exactly 1 input");
        self.block.embed(inputs[0], self.nrows, self.ncols)
    }

    fn backward(&self, grad_output: &Tensor, _inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![self.block.extract(grad_output)]
    }

    fn name(&self) -> &str {
        "Embed"
    }
}

/// Block-diagonal assembly of its inputs.
#[derive(Debug, Clone)]
pub struct BlockDiag;

fn diagonal_blocks(inputs: &[&Tensor]) -> Vec<Block> {
    let mut row = 0;
    let mut col = 0;
    inputs
        .iter()
        .map(|t| {
            let block = Block::new(row, col, t.nrows(), t.ncols());
            row += t.nrows();
            col += t.ncols();
            block
        })
        .collect()
}

impl Op for BlockDiag {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert!(!inputs.is_empty(), "BlockDiag requires at least 1 input");
        let blocks = diagonal_blocks(inputs);
        let nrows: usize = inputs.iter().map(|t| t.nrows()).sum();
        let ncols: usize = inputs.iter().map(|t| t.ncols()).sum();
        let mut shape = inputs[0].batch_shape().to_vec();
        shape.extend([nrows, ncols]);
        let mut out = Tensor::zeros(&shape);
        for (t, block) in inputs.iter().zip(&blocks) {
            assert_eq!(
                t.batch_shape(),
                inputs[0].batch_shape(),
                "BlockDiag inputs must share a batch shape"
            );
            for (dst, src) in out.matrices_mut().iter_mut().zip(t.matrices()) {
                dst.view_mut((block.row, block.col), (block.rows, block.cols))
                    .copy_from(src);
            }
        }
        out
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        diagonal_blocks(inputs)
            .iter()
            .map(|block| block.extract(grad_output))
            .collect()
    }

    fn name(&self) -> &str {
        "BlockDiag"
    }
}

/// `M * diag(s)` for a matrix `M` (`m x r`) and a column `s` (`r x 1`).
#[derive(Debug, Clone)]
pub struct ScaleColumns;

impl Op for ScaleColumns {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 2, "ScaleColumns requires exactly 2 inputs");
        assert_eq!(
            (inputs[1].nrows(), inputs[1].ncols()),
            (inputs[0].ncols(), 1),
            "ScaleColumns needs one scale per column"
        );
        inputs[0].zip_map(inputs[1], |m, s| {
            let mut out = m.clone();
            for (j, mut column) in out.column_iter_mut().enumerate() {
                column *= s[j];
            }
            out
        })
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        let grad_m = self.forward(&[grad_output, inputs[1]]);
        let grad_s = grad_output.zip_map(inputs[0], |g, m| {
            DMatrix::from_fn(m.ncols(), 1, |j, _| g.column(j).dot(&m.column(j)))
        });
        vec![grad_m, grad_s]
    }

    fn name(&self) -> &str {
        "ScaleColumns"
    }
}
