//! Modeling the positional warp between both catalogs.

use nalgebra::Vector2;
use ndarray::{Array1, Array2, ArrayView2, Axis, stack};

use crate::error::CrossmatchError;
use crate::matching::Match;
use crate::rbf::RbfSurface;
use crate::source::Catalog;

/// A smooth vector field of `(Δra, Δdec)` offsets in degrees, target minus reference.
///
/// Fit from the current confirmed matches and rebuilt every round.
#[derive(Clone, Debug, PartialEq)]
pub struct OffsetField {
    ra: RbfSurface<f64>,
    dec: RbfSurface<f64>,
}

impl OffsetField {
    /// Fit the field through the offsets of `matches`, positioned at their target sources.
    ///
    /// At least two matches are needed.
    pub fn fit<'a>(
        matches: impl IntoIterator<Item = &'a Match>,
        smoothing: f64,
    ) -> Result<Self, CrossmatchError> {
        let (positions, offsets): (Vec<[f64; 2]>, Vec<Vector2<f64>>) = matches
            .into_iter()
            .map(|m| ([m.target.ra, m.target.dec], m.offset()))
            .unzip();

        let positions = Array2::from(positions);
        let d_ra: Array1<f64> = offsets.iter().map(|o| o.x).collect();
        let d_dec: Array1<f64> = offsets.iter().map(|o| o.y).collect();

        Ok(Self {
            ra: RbfSurface::fit(positions.view(), d_ra.view(), smoothing)?,
            dec: RbfSurface::fit(positions.view(), d_dec.view(), smoothing)?,
        })
    }

    /// Predicted offset at a position.
    pub fn predict(&self, ra: f64, dec: f64) -> Vector2<f64> {
        Vector2::new(self.ra.at(ra, dec), self.dec.at(ra, dec))
    }

    /// Predicted offsets at many positions. Shape `(n_points, 2)`.
    pub fn predict_many(&self, positions: ArrayView2<f64>) -> Array2<f64> {
        stack![
            Axis(1),
            self.ra.evaluate(positions),
            self.dec.evaluate(positions)
        ]
    }

    /// Positions of `catalog` with the predicted offsets removed.
    ///
    /// Both components are evaluated at the uncorrected position.
    pub fn correct(&self, catalog: &Catalog) -> Array2<f64> {
        let positions = catalog.positions();
        let offsets = self.predict_many(positions.view());
        positions - offsets
    }
}
