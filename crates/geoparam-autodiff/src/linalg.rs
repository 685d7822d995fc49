//! Matrix functions with analytic backward passes.

use crate::ops::Op;
use crate::tensor::Tensor;
use nalgebra::DMatrix;
use tracing::warn;

/// Default angular distance, in radians, between an eigenvalue of a Cayley
/// output and -1 below which the transform is reported as ill-conditioned.
pub const CAYLEY_MIN_ANGLE: f64 = 1e-3;

/// Fréchet derivative of the matrix exponential at `a` applied to `e`.
///
/// Uses the block identity
/// `exp([[A, E], [0, A]]) = [[exp(A), L(A, E)], [0, exp(A)]]`.
pub fn frechet_exp(a: &DMatrix<f64>, e: &DMatrix<f64>) -> DMatrix<f64> {
    let n = a.nrows();
    let mut block = DMatrix::zeros(2 * n, 2 * n);
    block.view_mut((0, 0), (n, n)).copy_from(a);
    block.view_mut((0, n), (n, n)).copy_from(e);
    block.view_mut((n, n), (n, n)).copy_from(a);
    block.exp().view((0, n), (n, n)).into_owned()
}

/// Matrix exponential of square matrices.
///
/// The backward pass is the adjoint of the Fréchet derivative,
/// `L(Aᵀ, G)`, evaluated through [`frechet_exp`] rather than by
/// differentiating the scaling and squaring iterations.
#[derive(Debug, Clone)]
pub struct MatrixExp;

impl Op for MatrixExp {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "MatrixExp requires exactly 1 input");
        assert_eq!(
            inputs[0].nrows(),
            inputs[0].ncols(),
            "MatrixExp requires square matrices"
        );
        inputs[0].map(|m| m.exp())
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], _output: &Tensor) -> Vec<Tensor> {
        vec![inputs[0].zip_map(grad_output, |a, g| frechet_exp(&a.transpose(), g))]
    }

    fn name(&self) -> &str {
        "MatrixExp"
    }
}

/// Cayley transform `Q = (I + A)⁻¹ (I - A)`.
///
/// For skew-symmetric `A` with spectral norm `θ` the output is orthogonal and
/// its eigenvalues lie at angle at most `2·atan(θ)` from 1, so the closest one
/// sits `π - 2·atan(θ)` away from -1. The transform never reaches -1 itself;
/// inputs that come within `min_angle` of it are reported with a warning.
#[derive(Debug, Clone)]
pub struct CayleyTransform {
    /// Angular distance to -1 below which a warning is logged
    pub min_angle: f64,
}

impl Default for CayleyTransform {
    fn default() -> Self {
        Self {
            min_angle: CAYLEY_MIN_ANGLE,
        }
    }
}

fn solve(lhs: &DMatrix<f64>, rhs: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    lhs.clone().lu().solve(rhs)
}

impl CayleyTransform {
    /// Transform warning once its output comes within `min_angle` of -1.
    pub fn with_min_angle(min_angle: f64) -> Self {
        Self { min_angle }
    }

    /// Angular distance between -1 and the spectrum of the output for `a`,
    /// from the spectral norm of `a`.
    pub fn angle_to_minus_one(a: &DMatrix<f64>) -> f64 {
        let spectral = a.singular_values().max();
        std::f64::consts::PI - 2.0 * spectral.atan()
    }

    /// The angle to -1 when it is below `min_angle`.
    pub fn ill_conditioned(&self, a: &DMatrix<f64>) -> Option<f64> {
        let angle = Self::angle_to_minus_one(a);
        (angle < self.min_angle).then_some(angle)
    }

    fn transform(&self, a: &DMatrix<f64>) -> DMatrix<f64> {
        let n = a.nrows();
        if let Some(angle) = self.ill_conditioned(a) {
            warn!(
                angle,
                min_angle = self.min_angle,
                "Cayley transform output has an eigenvalue close to -1"
            );
        }
        let id = DMatrix::<f64>::identity(n, n);
        let plus = &id + a;
        let minus = &id - a;
        solve(&plus, &minus).unwrap_or_else(|| {
            warn!("Cayley transform: I + A is singular, using a pseudo-inverse");
            plus.pseudo_inverse(f64::EPSILON)
                .map(|inv| inv * &minus)
                .unwrap_or_else(|_| DMatrix::from_element(n, n, f64::NAN))
        })
    }
}

impl Op for CayleyTransform {
    fn forward(&self, inputs: &[&Tensor]) -> Tensor {
        assert_eq!(inputs.len(), 1, "CayleyTransform requires exactly 1 input");
        assert_eq!(
            inputs[0].nrows(),
            inputs[0].ncols(),
            "CayleyTransform requires square matrices"
        );
        inputs[0].map(|a| self.transform(a))
    }

    fn backward(&self, grad_output: &Tensor, inputs: &[&Tensor], output: &Tensor) -> Vec<Tensor> {
        // dQ = -(I + A)⁻¹ dA (Q + I), so grad_A = -(I + A)⁻ᵀ G (Q + I)ᵀ
        let lhs = inputs[0].zip_map(grad_output, |a, g| {
            let n = a.nrows();
            let plus_t = (DMatrix::<f64>::identity(n, n) + a).transpose();
            solve(&plus_t, g).unwrap_or_else(|| {
                warn!("Cayley transform backward: singular system, gradient dropped");
                DMatrix::zeros(n, n)
            })
        });
        vec![lhs.zip_map(output, |x, q| {
            let n = q.nrows();
            -(x * (q + DMatrix::<f64>::identity(n, n)).transpose())
        })]
    }

    fn name(&self) -> &str {
        "CayleyTransform"
    }
}
