//! Radial-basis-function interpolation with a linear kernel.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::Float;
use crate::error::CrossmatchError;

/// A smooth scalar surface over the plane, fit through scattered samples.
///
/// The surface is
/// \[ f(p) = \sum_i w_i \, \lVert p - p_i \rVert, \]
/// where the weights solve \[ (\Phi - s I) w = v \] with \(\Phi_{ij} = \lVert p_i - p_j \rVert\)
/// and smoothing \(s\).
/// With `s = 0` the surface passes exactly through the samples.
#[derive(Clone, Debug, PartialEq)]
pub struct RbfSurface<F: Float> {
    nodes: Vec<[F; 2]>,
    weights: DVector<F>,
}

impl<F: Float> RbfSurface<F> {
    /// Fit the surface.
    ///
    /// # Arguments
    /// - `points`: Sample positions. Shape `(n_points, 2)`.
    /// - `values`: Sample values. Shape `(n_points,)`.
    /// - `smooth`: Smoothing parameter.
    pub fn fit(
        points: ArrayView2<F>,
        values: ArrayView1<F>,
        smooth: F,
    ) -> Result<Self, CrossmatchError> {
        let n = points.shape()[0];
        assert_eq!(n, values.len(), "one value per point required");
        if n < 2 {
            return Err(CrossmatchError::TooFewMatches {
                found: n,
                required: 2,
            });
        }

        let nodes: Vec<[F; 2]> = points
            .axis_iter(Axis(0))
            .map(|p| [p[0], p[1]])
            .collect();
        let phi = DMatrix::from_fn(n, n, |i, j| {
            let r = distance(&nodes[i], &nodes[j]);
            if i == j { r - smooth } else { r }
        });
        let rhs = DVector::from_iterator(n, values.iter().copied());

        let weights = phi
            .lu()
            .solve(&rhs)
            .ok_or(CrossmatchError::ModelFit("singular RBF system"))?;
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(CrossmatchError::ModelFit("non-finite RBF weights"));
        }

        Ok(Self { nodes, weights })
    }

    /// Evaluate at a single position.
    pub fn at(&self, x: F, y: F) -> F {
        let p = [x, y];
        self.nodes
            .iter()
            .zip(self.weights.iter())
            .fold(F::from_f64(0.).unwrap(), |acc, (node, w)| {
                acc + *w * distance(&p, node)
            })
    }

    /// Evaluate at many positions. Shape `(n_points, 2)`.
    pub fn evaluate(&self, points: ArrayView2<F>) -> Array1<F> {
        points
            .axis_iter(Axis(0))
            .map(|p| self.at(p[0], p[1]))
            .collect()
    }
}

fn distance<F: Float>(p1: &[F; 2], p2: &[F; 2]) -> F {
    let dx = p1[0] - p2[0];
    let dy = p1[1] - p2[1];
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn interpolates_without_smoothing() {
        let points = array![[0., 0.], [1., 0.], [0., 1.], [1., 1.], [0.5, 0.3]];
        let values = array![1., 2., -1., 0.5, 3.];
        let rbf = RbfSurface::fit(points.view(), values.view(), 0.).unwrap();

        let evaluated = rbf.evaluate(points.view());
        assert_abs_diff_eq!(evaluated, values, epsilon = 1e-10);
    }

    #[test]
    fn two_points_linear_in_between() {
        // phi = [[0, 1], [1, 0]] gives w = [v1, v0]
        let points = array![[0., 0.], [1., 0.]];
        let values = array![2., 4.];
        let rbf = RbfSurface::fit(points.view(), values.view(), 0.).unwrap();

        assert_abs_diff_eq!(rbf.at(0.5, 0.), 3., epsilon = 1e-12);
        assert_abs_diff_eq!(rbf.at(0.25, 0.), 2.5, epsilon = 1e-12);
    }

    #[test]
    fn smoothing_relaxes_fit() {
        let points = array![[0., 0.], [1., 0.], [0., 1.], [1., 1.]];
        let values = array![0., 1., 1., 0.];
        let exact = RbfSurface::fit(points.view(), values.view(), 0.).unwrap();
        let smooth = RbfSurface::fit(points.view(), values.view(), 0.5).unwrap();

        assert_abs_diff_eq!(exact.at(1., 0.), 1., epsilon = 1e-10);
        assert!((smooth.at(1., 0.) - 1.0f64).abs() > 1e-3);
    }

    #[test]
    fn too_few_points() {
        let points = array![[0., 0.]];
        let values = array![1.];
        assert_eq!(
            RbfSurface::fit(points.view(), values.view(), 0.),
            Err(CrossmatchError::TooFewMatches {
                found: 1,
                required: 2
            })
        );
    }

    #[test]
    fn duplicate_points_are_singular() {
        let points = array![[0.5, 0.5], [0.5, 0.5]];
        let values = array![1., 2.];
        assert!(matches!(
            RbfSurface::fit(points.view(), values.view(), 0.),
            Err(CrossmatchError::ModelFit(_))
        ));
    }
}
