//! Gaussian likelihoods that a reference source is the counterpart of a target source.
//!
//! Both scores are unnormalized: a perfect agreement scores 1 regardless of the error budget.
//! Target positions passed in here must be the offset-corrected ones.

use ndarray::Array1;

use crate::geometry::angular_separation;
use crate::source::Source;

/// `exp(-error² / (2 budget²))`, with a zero budget only accepting exact agreement.
fn gaussian(error: f64, budget: f64) -> f64 {
    if budget == 0. {
        return if error == 0. { 1. } else { 0. };
    }
    (-(error * error) / (2. * budget * budget)).exp()
}

/// Combined positional uncertainty of a pair in degrees.
///
/// Quadrature sum of the resolutions (PSF semi-major axes) and the larger positional error of
/// both sources.
pub fn position_budget(reference: &Source, target: &Source) -> f64 {
    (reference.resolution().powi(2)
        + reference.position_error().powi(2)
        + target.resolution().powi(2)
        + target.position_error().powi(2))
    .sqrt()
}

/// Combined flux uncertainty of a pair.
pub fn flux_budget(reference: &Source, target: &Source) -> f64 {
    (reference.local_rms.powi(2)
        + target.local_rms.powi(2)
        + target.err_peak_flux.powi(2)
        + reference.err_peak_flux.powi(2))
    .sqrt()
}

/// Probability that `target` matches each of `candidates` in position.
pub fn position_prob<'a>(
    candidates: impl IntoIterator<Item = &'a Source>,
    target: &Source,
) -> Array1<f64> {
    candidates
        .into_iter()
        .map(|reference| {
            let error = angular_separation(reference.ra, reference.dec, target.ra, target.dec);
            gaussian(error, position_budget(reference, target))
        })
        .collect()
}

/// Probability that `target` matches each of `candidates` in flux.
pub fn flux_prob<'a>(
    candidates: impl IntoIterator<Item = &'a Source>,
    target: &Source,
) -> Array1<f64> {
    candidates
        .into_iter()
        .map(|reference| {
            gaussian(
                reference.peak_flux - target.peak_flux,
                flux_budget(reference, target),
            )
        })
        .collect()
}
