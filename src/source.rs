//! Source records and the immutable catalogs built from them.

use std::collections::HashSet;
use std::ops::Index;

use itertools::Itertools;
use ndarray::{Array2, ArrayView2};

use crate::error::CrossmatchError;

/// A single catalog entry.
///
/// Positions and positional errors are in degrees, angular sizes and PSF half-widths in
/// arcseconds, the position angle in degrees.
#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    /// Unique id within its catalog.
    pub id: String,
    /// Right ascension.
    pub ra: f64,
    /// Declination.
    pub dec: f64,
    /// Error on `ra`.
    pub err_ra: f64,
    /// Error on `dec`.
    pub err_dec: f64,
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Position angle.
    pub pa: f64,
    /// Local background noise.
    pub local_rms: f64,
    /// Peak flux.
    pub peak_flux: f64,
    /// Error on `peak_flux`.
    pub err_peak_flux: f64,
    /// PSF semi-major axis.
    pub psf_a: f64,
    /// PSF semi-minor axis.
    pub psf_b: f64,
}

impl Source {
    /// Create a point-like source without any uncertainties.
    /// Use the `with_` functions to fill in the rest.
    pub fn new(id: impl Into<String>, ra: f64, dec: f64, peak_flux: f64) -> Self {
        Self {
            id: id.into(),
            ra,
            dec,
            err_ra: 0.,
            err_dec: 0.,
            a: 0.,
            b: 0.,
            pa: 0.,
            local_rms: 0.,
            peak_flux,
            err_peak_flux: 0.,
            psf_a: 0.,
            psf_b: 0.,
        }
    }

    /// Set the positional errors.
    pub fn with_position_errors(mut self, err_ra: f64, err_dec: f64) -> Self {
        self.err_ra = err_ra;
        self.err_dec = err_dec;
        self
    }

    /// Set the angular size.
    pub fn with_shape(mut self, a: f64, b: f64, pa: f64) -> Self {
        self.a = a;
        self.b = b;
        self.pa = pa;
        self
    }

    /// Set the PSF half-widths.
    pub fn with_psf(mut self, psf_a: f64, psf_b: f64) -> Self {
        self.psf_a = psf_a;
        self.psf_b = psf_b;
        self
    }

    /// Set the local noise and the flux error.
    pub fn with_noise(mut self, local_rms: f64, err_peak_flux: f64) -> Self {
        self.local_rms = local_rms;
        self.err_peak_flux = err_peak_flux;
        self
    }

    /// Signal-to-noise ratio.
    pub fn snr(&self) -> f64 {
        self.peak_flux / self.local_rms
    }

    /// Resolution in degrees, taken from the PSF semi-major axis.
    pub fn resolution(&self) -> f64 {
        self.psf_a / 3600.
    }

    /// The larger of both positional errors.
    pub fn position_error(&self) -> f64 {
        self.err_ra.max(self.err_dec)
    }
}

/// An ordered collection of sources with unique ids.
///
/// All operations return new catalogs; a catalog is never changed in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    sources: Vec<Source>,
}

impl Catalog {
    /// Create a catalog, failing on duplicate ids.
    pub fn new(sources: Vec<Source>) -> Result<Self, CrossmatchError> {
        let mut seen = HashSet::with_capacity(sources.len());
        if let Some(dup) = sources.iter().find(|s| !seen.insert(s.id.as_str())) {
            return Err(CrossmatchError::DuplicateId(dup.id.clone()));
        }
        Ok(Self { sources })
    }

    /// Subsets of a valid catalog keep their ids unique.
    fn subset(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterate over the sources in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Source> {
        self.sources.iter()
    }

    /// All sources in order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.id.as_str())
    }

    /// Find a source by id.
    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Positions as an `(n, 2)` array of `(ra, dec)`.
    pub fn positions(&self) -> Array2<f64> {
        Array2::from(self.sources.iter().map(|s| [s.ra, s.dec]).collect_vec())
    }

    /// Keep the sources satisfying `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Source) -> bool) -> Self {
        Self::subset(self.sources.iter().filter(|s| predicate(s)).cloned().collect())
    }

    /// Drop the sources whose id is in `ids`.
    pub fn without(&self, ids: &HashSet<String>) -> Self {
        self.filter(|s| !ids.contains(&s.id))
    }

    /// Divide flux and flux error of each source by `factor(source)`.
    pub fn scale_flux(&self, mut factor: impl FnMut(&Source) -> f64) -> Self {
        Self::subset(
            self.sources
                .iter()
                .map(|s| {
                    let f = factor(s);
                    Source {
                        peak_flux: s.peak_flux / f,
                        err_peak_flux: s.err_peak_flux / f,
                        ..s.clone()
                    }
                })
                .collect(),
        )
    }

    /// Replace the positions, row `i` of `positions` going to source `i`.
    pub fn with_positions(&self, positions: ArrayView2<f64>) -> Self {
        assert_eq!(
            positions.shape(),
            &[self.len(), 2],
            "one position per source required"
        );
        Self::subset(
            self.sources
                .iter()
                .zip(positions.rows())
                .map(|(s, p)| Source {
                    ra: p[0],
                    dec: p[1],
                    ..s.clone()
                })
                .collect(),
        )
    }
}

impl Index<usize> for Catalog {
    type Output = Source;

    fn index(&self, index: usize) -> &Self::Output {
        &self.sources[index]
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Source;

    type IntoIter = std::slice::Iter<'a, Source>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}

/// The two index-aligned views of the target catalog.
///
/// `original` keeps the image positions, `adjusted` the positions corrected by the current
/// offset model. Every removal applies to both views.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetCatalog {
    original: Catalog,
    adjusted: Catalog,
}

impl TargetCatalog {
    /// Start with adjusted positions equal to the original ones.
    pub fn new(original: Catalog) -> Self {
        Self {
            adjusted: original.clone(),
            original,
        }
    }

    /// Image positions.
    pub fn original(&self) -> &Catalog {
        &self.original
    }

    /// Offset-corrected positions.
    pub fn adjusted(&self) -> &Catalog {
        &self.adjusted
    }

    /// Number of sources in each view.
    pub fn len(&self) -> usize {
        self.original.len()
    }

    /// Whether both views are empty.
    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    /// Replace the adjusted positions, keeping the original ones.
    pub fn with_adjusted_positions(&self, positions: ArrayView2<f64>) -> Self {
        Self {
            original: self.original.clone(),
            adjusted: self.original.with_positions(positions),
        }
    }

    /// Keep the sources whose original record satisfies `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Source) -> bool) -> Self {
        let keep = self.original.iter().map(&predicate).collect_vec();
        let pick = |catalog: &Catalog| {
            Catalog::subset(
                catalog
                    .iter()
                    .zip(&keep)
                    .filter(|(_, k)| **k)
                    .map(|(s, _)| s.clone())
                    .collect(),
            )
        };
        Self {
            original: pick(&self.original),
            adjusted: pick(&self.adjusted),
        }
    }

    /// Drop the sources whose id is in `ids` from both views.
    pub fn without(&self, ids: &HashSet<String>) -> Self {
        Self {
            original: self.original.without(ids),
            adjusted: self.adjusted.without(ids),
        }
    }

    /// Split into `(original, adjusted)`.
    pub fn into_parts(self) -> (Catalog, Catalog) {
        (self.original, self.adjusted)
    }
}
