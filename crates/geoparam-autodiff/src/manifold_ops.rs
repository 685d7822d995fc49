//! Sphere operations for automatic differentiation.
//!
//! Both operations treat every row of a matrix as one point of the sphere
//! `{x : ‖x‖ = radius}`.

use crate::ops::Op;
use crate::tensor::Tensor;
use nalgebra::DMatrix;

/// Rows shorter than this are left in place by [`RowNormalize`].
const MIN_ROW_NORM: f64 = 1e-12;

/// Below this angle the sphere exponential switches to Taylor expansions.
const SMALL_ANGLE: f64 = 1e-4;

/// Scales each row to norm `radius`.
#[derive(Debug, Clone)]
pub struct RowNormalize {
    /// Target row norm
    pub radius: f64,
}

impl RowNormalize {
    /// Creates a projection onto the sphere of radius `radius`.
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }
}

impl Op for RowNormalize {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "RowNormalize requires exactly 1 input");
        inputs[0].map(|m| {
            let mut out = m.clone();
            for mut row in out.row_iter_mut() {
                let norm = row.norm();
                if norm > MIN_ROW_NORM {
                    row *= self.radius / norm;
                }
            }
            out
        })
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![inputs[0].zip_map(grad_output, |x, g| {
            let mut grad = g.clone();
            for (i, mut row) in grad.row_iter_mut().enumerate() {
                let norm = x.row(i).norm();
                if norm <= MIN_ROW_NORM {
                    continue;
                }
                let unit = x.row(i) / norm;
                let radial = row.dot(&unit);
                let tangent = &row - unit * radial;
                row.copy_from(&(tangent * (self.radius / norm)));
            }
            grad
        })]
    }

    fn name(&self) -> &str {
        "RowNormalize"
    }
}

/// Riemannian exponential of the sphere at a base point.
///
/// Inputs are the ambient rows `x` and the unit base rows `b`. The tangent
/// vector `v = x - ⟨x, b⟩ b` is mapped to
/// `radius · (cos‖v‖ b + sin‖v‖ v / ‖v‖)`. The base is a buffer and gets a
/// zero gradient.
#[derive(Debug, Clone)]
pub struct SphereExp {
    /// Sphere radius
    pub radius: f64,
}

impl SphereExp {
    /// Creates the exponential of the sphere of radius `radius`.
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }
}

/// `sin t / t` and `(t cos t - sin t) / t³`, stable near zero.
fn sinc_terms(t: f64) -> (f64, f64) {
    if t < SMALL_ANGLE {
        let t2 = t * t;
        (1.0 - t2 / 6.0, -1.0 / 3.0 + t2 / 30.0)
    } else {
        let (sin, cos) = t.sin_cos();
        (sin / t, (t * cos - sin) / (t * t * t))
    }
}

impl Op for SphereExp {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 2, "SphereExp requires exactly 2 inputs: ambient and base");
        inputs[0].zip_map(inputs[1], |x, b| {
            assert_eq!(x.shape(), b.shape(), "SphereExp base must match its input");
            let mut out = DMatrix::zeros(x.nrows(), x.ncols());
            for i in 0..x.nrows() {
                let base = b.row(i);
                let v = x.row(i) - base * x.row(i).dot(&base);
                let t = v.norm();
                let (sinc, _) = sinc_terms(t);
                let point = base * t.cos() + v * sinc;
                out.row_mut(i).copy_from(&(point * self.radius));
            }
            out
        })
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        // Row-wise chain rule through v = (I - bbᵀ) x.
        let mut grad_x = grad_output.clone();
        let xs = inputs[0].matrices();
        let bases = inputs[1].matrices();
        for (k, gm) in grad_x.matrices_mut().iter_mut().enumerate() {
            let (x, b) = (&xs[k], &bases[k]);
            for i in 0..x.nrows() {
                let base = b.row(i);
                let v = x.row(i) - base * x.row(i).dot(&base);
                let (sinc, dsinc) = sinc_terms(v.norm());
                let g = gm.row(i) * self.radius;
                let coeff = -sinc * g.dot(&base) + dsinc * g.dot(&v);
                let grad_v = &g * sinc + &v * coeff;
                let grad_row = &grad_v - base * grad_v.dot(&base);
                gm.row_mut(i).copy_from(&grad_row);
            }
        }
        vec![grad_x, Tensor::zeros(&inputs[1].shape())]
    }

    fn name(&self) -> &str {
        "SphereExp"
    }
}
