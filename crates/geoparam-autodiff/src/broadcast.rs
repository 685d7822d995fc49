//! Broadcasting support for tensor operations.
//!
//! Trailing matrix dimensions follow NumPy rules restricted to two axes: a
//! dimension broadcasts when it equals 1. An unbatched right operand
//! broadcasts over every batch entry of the left one.

use crate::ops::Op;
use crate::tensor::Tensor;
use nalgebra::DMatrix;
use thiserror::Error;

/// Shapes that cannot be broadcast together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("incompatible shapes for broadcasting: ({0}, {1}) and ({2}, {3})")]
pub struct BroadcastError(pub usize, pub usize, pub usize, pub usize);

/// Computes the output shape for broadcasting two matrix shapes.
pub fn broadcast_shape(
    shape_a: (usize, usize),
    shape_b: (usize, usize),
) -> Result<(usize, usize), BroadcastError> {
    let (rows_a, cols_a) = shape_a;
    let (rows_b, cols_b) = shape_b;
    let err = || BroadcastError(rows_a, cols_a, rows_b, cols_b);

    let out_rows = match (rows_a, rows_b) {
        (a, b) if a == b => a,
        (1, b) => b,
        (a, 1) => a,
        _ => return Err(err()),
    };
    let out_cols = match (cols_a, cols_b) {
        (a, b) if a == b => a,
        (1, b) => b,
        (a, 1) => a,
        _ => return Err(err()),
    };
    Ok((out_rows, out_cols))
}

fn expand(m: &DMatrix<f64>, shape: (usize, usize)) -> DMatrix<f64> {
    if m.shape() == shape {
        return m.clone();
    }
    let (rows, cols) = m.shape();
    DMatrix::from_fn(shape.0, shape.1, |i, j| {
        m[(if rows == 1 { 0 } else { i }, if cols == 1 { 0 } else { j })]
    })
}

/// Sums a broadcast gradient back to `shape`.
pub fn unbroadcast(grad: &DMatrix<f64>, shape: (usize, usize)) -> DMatrix<f64> {
    let mut result = grad.clone();
    if shape.0 == 1 && result.nrows() > 1 {
        result = DMatrix::from_fn(1, result.ncols(), |_, j| result.column(j).sum());
    }
    if shape.1 == 1 && result.ncols() > 1 {
        result = DMatrix::from_fn(result.nrows(), 1, |i, _| result.row(i).sum());
    }
    result
}

/// Broadcast-aware element-wise addition, used for biases.
#[derive(Debug, Clone)]
pub struct BroadcastAdd;

impl BroadcastAdd {
    fn rhs<'t>(lhs: &Tensor, rhs: &'t Tensor, k: usize) -> &'t DMatrix<f64> {
        if rhs.batch_shape().is_empty() {
            rhs.matrix()
        } else {
            assert_eq!(
                lhs.batch_shape(),
                rhs.batch_shape(),
                "BroadcastAdd batch shapes differ"
            );
            &rhs.matrices()[k]
        }
    }
}

impl Op for BroadcastAdd {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 2, "BroadcastAdd requires exactly 2 inputs");
        let (a, b) = (inputs[0], inputs[1]);
        let shape = match broadcast_shape((a.nrows(), a.ncols()), (b.nrows(), b.ncols())) {
            Ok(shape) => shape,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(
            shape,
            (a.nrows(), a.ncols()),
            "BroadcastAdd only broadcasts its right operand"
        );
        let mut out = a.clone();
        for (k, m) in out.matrices_mut().iter_mut().enumerate() {
            *m += expand(Self::rhs(a, b, k), shape);
        }
        out
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        let b = inputs[1];
        let shape = (b.nrows(), b.ncols());
        let grad_b = if b.batch_shape().is_empty() {
            let total = grad_output
                .matrices()
                .iter()
                .fold(DMatrix::zeros(shape.0, shape.1), |acc, g| {
                    acc + unbroadcast(g, shape)
                });
            Tensor::from_matrix(total)
        } else {
            grad_output.map(|g| unbroadcast(g, shape))
        };
        vec![grad_output.clone(), grad_b]
    }

    fn name(&self) -> &str {
        "BroadcastAdd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape((2, 3), (2, 3)).unwrap(), (2, 3));
        assert_eq!(broadcast_shape((1, 3), (2, 3)).unwrap(), (2, 3));
        assert_eq!(broadcast_shape((2, 1), (2, 3)).unwrap(), (2, 3));
        assert_eq!(broadcast_shape((1, 1), (2, 3)).unwrap(), (2, 3));

        assert!(broadcast_shape((2, 3), (3, 3)).is_err());
        assert!(broadcast_shape((2, 3), (2, 4)).is_err());
    }

    #[test]
    fn test_unbroadcast_scalar() {
        let grad = DMatrix::from_element(3, 4, 2.0);
        let summed = unbroadcast(&grad, (1, 1));
        assert_eq!(summed.shape(), (1, 1));
        assert_eq!(summed[(0, 0)], 24.0);
    }

    #[test]
    fn test_row_bias_over_batch() {
        let x = Tensor::from_element(&[2, 3, 2], 1.0);
        let bias = Tensor::from_row_slice(1, 2, &[10.0, 20.0]);
        let out = BroadcastAdd.forward(&[&x, &bias]);
        assert_eq!(out.matrices()[1][(2, 1)], 21.0);

        let ones = Tensor::from_element(&[2, 3, 2], 1.0);
        let grads = BroadcastAdd.backward(&ones, &[&x, &bias], &out);
        assert_eq!(grads[1], Tensor::from_row_slice(1, 2, &[6.0, 6.0]));
    }
}
