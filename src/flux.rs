//! Calibration of the target flux scale against the reference catalog.

use log::{error, info, warn};
use nalgebra::{DMatrix, DVector, SVD};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::Float;
use crate::error::CrossmatchError;
use crate::ndarray_utils::{max_axis, min_axis};
use crate::search::nearest_within;
use crate::source::Catalog;

/// Minimum SNR of target sources used to sample the flux ratio.
const CALIBRATION_SNR: f64 = 10.;

/// A least-squares polynomial surface of a given degree in each axis.
///
/// This is the tensor-product spline without interior knots. Coordinates are mapped onto
/// `[-1, 1]` over the bounding box of the samples, and evaluation clamps to that box.
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialSurface<F: Float> {
    degree: usize,
    min: [F; 2],
    max: [F; 2],
    coefficients: DVector<F>,
}

impl<F: Float> PolynomialSurface<F> {
    /// Fit the surface.
    ///
    /// # Arguments
    /// - `points`: Sample positions. Shape `(n_points, 2)`.
    /// - `values`: Sample values. Shape `(n_points,)`.
    /// - `degree`: Polynomial degree in each axis.
    pub fn fit(
        points: ArrayView2<F>,
        values: ArrayView1<F>,
        degree: usize,
    ) -> Result<Self, CrossmatchError> {
        let n = points.shape()[0];
        assert_eq!(n, values.len(), "one value per point required");
        let n_terms = (degree + 1) * (degree + 1);
        if n < n_terms {
            return Err(CrossmatchError::InsufficientFluxSamples {
                found: n,
                required: n_terms,
            });
        }

        let min = min_axis(points, Axis(0));
        let max = max_axis(points, Axis(0));
        let mut surface = Self {
            degree,
            min: [min[0], min[1]],
            max: [max[0], max[1]],
            coefficients: DVector::zeros(n_terms),
        };

        let design = DMatrix::from_fn(n, n_terms, |i, k| {
            surface.basis(points[[i, 0]], points[[i, 1]])[k]
        });
        let rhs = DVector::from_iterator(n, values.iter().copied());

        let eps = F::default_epsilon() * F::from_usize(n.max(n_terms)).unwrap();
        let svd = SVD::new(design, true, true);
        let max_singular = svd.singular_values.max();
        if svd.rank(eps * max_singular) < n_terms {
            return Err(CrossmatchError::ModelFit("rank-deficient flux surface design"));
        }
        surface.coefficients = svd
            .solve(&rhs, eps * max_singular)
            .map_err(CrossmatchError::ModelFit)?;
        Ok(surface)
    }

    /// Map a coordinate onto `[-1, 1]`, clamping to the fitted domain.
    fn normalize(&self, value: F, axis: usize) -> F {
        let one = F::from_f64(1.).unwrap();
        let span = self.max[axis] - self.min[axis];
        if span <= F::from_f64(0.).unwrap() {
            return F::from_f64(0.).unwrap();
        }
        let t = (value - self.min[axis]) / span * F::from_f64(2.).unwrap() - one;
        t.clamp(-one, one)
    }

    /// The monomials `u^i v^j`, `i` major.
    fn basis(&self, x: F, y: F) -> Vec<F> {
        let u = self.normalize(x, 0);
        let v = self.normalize(y, 1);
        let powers = |t: F| {
            std::iter::successors(Some(F::from_f64(1.).unwrap()), move |p| Some(*p * t))
                .take(self.degree + 1)
                .collect::<Vec<_>>()
        };
        let (pu, pv) = (powers(u), powers(v));
        pu.iter()
            .flat_map(|a| pv.iter().map(move |b| *a * *b))
            .collect()
    }

    /// Evaluate at a position.
    pub fn at(&self, x: F, y: F) -> F {
        self.basis(x, y)
            .into_iter()
            .zip(self.coefficients.iter())
            .fold(F::from_f64(0.).unwrap(), |acc, (b, c)| acc + b * *c)
    }
}

/// Build the flux correction surface of `target` relative to `reference`.
///
/// Target sources with an SNR of at least 10 are matched to their nearest reference source
/// within `match_radius` degrees, and a surface of `degree` is fit to the flux ratios
/// `target / reference` over their positions.
pub fn flux_model(
    target: &Catalog,
    reference: &Catalog,
    degree: usize,
    match_radius: f64,
) -> Result<PolynomialSurface<f64>, CrossmatchError> {
    let bright = target.filter(|s| s.snr() >= CALIBRATION_SNR);
    let pairs = nearest_within(&bright, reference, match_radius);

    let samples: Vec<([f64; 2], f64)> = pairs
        .into_iter()
        .map(|[i, j]| {
            let t = &bright[i];
            ([t.ra, t.dec], t.peak_flux / reference[j].peak_flux)
        })
        .filter(|(_, ratio)| ratio.is_finite() && *ratio > 0.)
        .collect();
    info!(
        "Modelling flux scale from {} of {} high-SNR target sources.",
        samples.len(),
        bright.len()
    );

    let required = (degree + 1) * (degree + 1);
    if samples.len() < required {
        error!(
            "Flux model of degree {} needs {} matches, found {}.",
            degree,
            required,
            samples.len()
        );
        return Err(CrossmatchError::InsufficientFluxSamples {
            found: samples.len(),
            required,
        });
    }

    let (positions, ratios): (Vec<[f64; 2]>, Vec<f64>) = samples.into_iter().unzip();
    let positions = Array2::from(positions);
    PolynomialSurface::fit(positions.view(), ArrayView1::from(&ratios), degree)
}

/// Divide the fluxes of `target` by the surface evaluated at each source.
///
/// Sources where the surface is not positive keep their flux.
pub fn apply_flux_model(target: &Catalog, model: &PolynomialSurface<f64>) -> Catalog {
    let mut unusable = 0;
    let corrected = target.scale_flux(|s| {
        let factor = model.at(s.ra, s.dec);
        if factor.is_finite() && factor > 0. {
            factor
        } else {
            unusable += 1;
            1.
        }
    });
    if unusable > 0 {
        warn!("Flux model is not positive at {unusable} target sources; their flux is unchanged.");
    }
    corrected
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use itertools::iproduct;
    use ndarray::array;

    use super::*;
    use crate::source::Source;

    #[test]
    fn fits_bilinear() {
        let points = array![[0., 0.], [2., 0.], [0., 4.], [2., 4.], [1., 1.]];
        let values = points.map_axis(Axis(1), |p| 1. + 0.5 * p[0] - 0.25 * p[1] + p[0] * p[1]);
        let surface = PolynomialSurface::fit(points.view(), values.view(), 1).unwrap();

        assert_abs_diff_eq!(surface.at(1.5, 3.), 1. + 0.75 - 0.75 + 4.5, epsilon = 1e-10);
        // clamped outside the domain
        assert_abs_diff_eq!(surface.at(5., 4.), surface.at(2., 4.), epsilon = 1e-12);
    }

    #[test]
    fn too_few_samples() {
        let points = array![[0., 0.], [1., 0.], [0., 1.]];
        let values = array![1., 1., 1.];
        assert_eq!(
            PolynomialSurface::fit(points.view(), values.view(), 1),
            Err(CrossmatchError::InsufficientFluxSamples {
                found: 3,
                required: 4
            })
        );
    }

    #[test]
    fn degenerate_samples() {
        let points = array![[0., 0.], [0., 1.], [0., 2.], [0., 3.]];
        let values = array![1., 1., 1., 1.];
        assert!(matches!(
            PolynomialSurface::fit(points.view(), values.view(), 1),
            Err(CrossmatchError::ModelFit(_))
        ));
    }

    fn catalogs(gain: impl Fn(f64, f64) -> f64) -> (Catalog, Catalog) {
        let (targets, references) = iproduct!(0..5, 0..5)
            .map(|(i, j)| {
                let (ra, dec) = (30. + 0.5 * i as f64, -20. + 0.5 * j as f64);
                let flux = 1. + 0.1 * (i + j) as f64;
                (
                    Source::new(format!("t{i}{j}"), ra + 0.001, dec, flux * gain(ra, dec))
                        .with_noise(0.01, 0.005),
                    Source::new(format!("r{i}{j}"), ra, dec, flux),
                )
            })
            .unzip();
        (
            Catalog::new(targets).unwrap(),
            Catalog::new(references).unwrap(),
        )
    }

    #[test]
    fn corrects_linear_gain() {
        let gain = |ra: f64, dec: f64| 1.2 + 0.1 * (ra - 30.) - 0.05 * (dec + 20.);
        let (targets, references) = catalogs(gain);

        let model = flux_model(&targets, &references, 1, 118. / 3600.).unwrap();
        let corrected = apply_flux_model(&targets, &model);

        for (t, r) in corrected.iter().zip(&references) {
            assert_abs_diff_eq!(t.peak_flux, r.peak_flux, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(
            corrected[0].err_peak_flux,
            0.005 / gain(30., -20.),
            epsilon = 1e-6
        );
    }

    #[test]
    fn faint_sources_do_not_count() {
        let (targets, references) = catalogs(|_, _| 1.);
        let faint = targets.scale_flux(|_| 1000.);
        assert_eq!(
            flux_model(&faint, &references, 1, 118. / 3600.),
            Err(CrossmatchError::InsufficientFluxSamples {
                found: 0,
                required: 4
            })
        );
    }
}
