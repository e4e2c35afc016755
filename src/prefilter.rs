//! Cutting the reference catalog down to the footprint of the target catalog.

use ndarray::Axis;

use crate::ndarray_utils::{max_axis, min_axis};
use crate::source::{Catalog, Source};

/// Number of edge widths the target bounding box is grown by.
const BUFFER_EDGES: f64 = 5.;

/// Largest value of `field` over `catalog`, or 0 for an empty catalog.
fn max_field(catalog: &Catalog, field: impl Fn(&Source) -> f64) -> f64 {
    catalog.iter().map(field).fold(0., f64::max)
}

/// Keep the reference sources strictly inside the bounding box of `target`, grown by a buffer.
///
/// The buffer is five times the sum of the largest source half-width and the largest PSF
/// half-width of the target catalog, converted from arcseconds to degrees.
/// The box is not wrapped in right ascension.
pub fn reference_pre_filter(target: &Catalog, reference: &Catalog) -> Catalog {
    if target.is_empty() {
        return Catalog::default();
    }

    let positions = target.positions();
    let min = min_axis(positions.view(), Axis(0));
    let max = max_axis(positions.view(), Axis(0));

    let size = max_field(target, |s| s.a).max(max_field(target, |s| s.b));
    let psf = max_field(target, |s| s.psf_a).max(max_field(target, |s| s.psf_b));
    let buffer = BUFFER_EDGES * (size + psf) / 3600.;

    reference.filter(|s| {
        s.ra > min[0] - buffer
            && s.ra < max[0] + buffer
            && s.dec > min[1] - buffer
            && s.dec < max[1] + buffer
    })
}
