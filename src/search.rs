//! Angular neighbour searches between two catalogs.
//!
//! Positions are placed on the unit sphere and indexed in a k-d tree, so an angular radius
//! becomes a Euclidean chord radius and wrapping in right ascension needs no special care.

use kiddo::float::{distance::SquaredEuclidean, kdtree::KdTree};

use crate::geometry::{angular_separation, chord_squared, unit_vector};
use crate::source::{Catalog, Source};

/// The reference sources near one target source.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateSet {
    /// Index of the target source.
    pub target: usize,
    /// Indices of the reference sources, nearest first.
    pub candidates: Vec<usize>,
    /// Great-circle separations in degrees, aligned with `candidates`.
    pub separations: Vec<f64>,
}

impl CandidateSet {
    /// Whether no reference source is close enough.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Drop candidates rejected by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let (candidates, separations) = self
            .candidates
            .iter()
            .zip(&self.separations)
            .filter(|(c, _)| keep(**c))
            .map(|(c, s)| (*c, *s))
            .unzip();
        self.candidates = candidates;
        self.separations = separations;
    }
}

/// A k-d tree over the positions of a catalog.
pub(crate) struct SkyTree {
    tree: KdTree<f64, usize, 3, 32, u32>,
    len: usize,
}

impl SkyTree {
    pub(crate) fn new(catalog: &Catalog) -> Self {
        let tree = catalog
            .iter()
            .enumerate()
            .map(|(i, s)| (unit_vector(s.ra, s.dec), i))
            .collect();
        Self {
            tree,
            len: catalog.len(),
        }
    }

    /// Indices and separations of all entries within `radius` degrees of `source`, nearest first.
    pub(crate) fn within(
        &self,
        catalog: &Catalog,
        source: &Source,
        radius: f64,
    ) -> Vec<(usize, f64)> {
        if self.len == 0 {
            return Vec::new();
        }
        // pad the chord slightly so rounding never drops a source right at the radius
        let chord = chord_squared(radius) * (1. + 1e-9);
        let mut found: Vec<(usize, f64)> = self
            .tree
            .within_unsorted::<SquaredEuclidean>(&unit_vector(source.ra, source.dec), chord)
            .into_iter()
            .map(|n| {
                let other = &catalog[n.item];
                (
                    n.item,
                    angular_separation(source.ra, source.dec, other.ra, other.dec),
                )
            })
            .filter(|(_, sep)| *sep <= radius)
            .collect();
        found.sort_by(|(i1, s1), (i2, s2)| s1.total_cmp(s2).then(i1.cmp(i2)));
        found
    }

    /// Index and separation of the nearest entry.
    pub(crate) fn nearest(&self, catalog: &Catalog, source: &Source) -> Option<(usize, f64)> {
        if self.len == 0 {
            return None;
        }
        let n = self
            .tree
            .nearest_one::<SquaredEuclidean>(&unit_vector(source.ra, source.dec));
        let other = &catalog[n.item];
        Some((
            n.item,
            angular_separation(source.ra, source.dec, other.ra, other.dec),
        ))
    }
}

/// Find all reference sources within `radius` degrees of each target source.
///
/// Returns one [`CandidateSet`] per target, in target order. Sets may be empty.
///
/// # Example:
/// ```
/// # use warpmatch::{Catalog, Source, search_around};
/// let targets = Catalog::new(vec![Source::new("t", 10., 0., 1.)]).unwrap();
/// let references = Catalog::new(vec![
///     Source::new("near", 10.05, 0., 1.),
///     Source::new("far", 12., 0., 1.),
/// ]).unwrap();
/// let sets = search_around(&targets, &references, 0.1);
/// assert_eq!(sets[0].candidates, vec![0]);
/// ```
pub fn search_around(targets: &Catalog, references: &Catalog, radius: f64) -> Vec<CandidateSet> {
    let tree = SkyTree::new(references);
    targets
        .iter()
        .enumerate()
        .map(|(i, target)| candidate_set(&tree, references, i, target, radius))
        .collect()
}

fn candidate_set(
    tree: &SkyTree,
    references: &Catalog,
    target_idx: usize,
    target: &Source,
    radius: f64,
) -> CandidateSet {
    let (candidates, separations) = tree.within(references, target, radius).into_iter().unzip();
    CandidateSet {
        target: target_idx,
        candidates,
        separations,
    }
}

/// Match each target source to its single nearest reference source, if that one lies within
/// `radius` degrees.
///
/// Returns `[target index, reference index]` pairs. Several targets may share a reference.
pub fn nearest_within(targets: &Catalog, references: &Catalog, radius: f64) -> Vec<[usize; 2]> {
    let tree = SkyTree::new(references);
    targets
        .iter()
        .enumerate()
        .filter_map(|(i, target)| {
            let (j, sep) = tree.nearest(references, target)?;
            (sep <= radius).then_some([i, j])
        })
        .collect()
}

#[cfg(feature = "parallel")]
pub use parallel::*;

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use rayon::prelude::*;

    /// Find all reference sources within `radius` degrees of each target source, in parallel.
    ///
    /// Also see [`search_around`] for more details.
    pub fn search_around_par(
        targets: &Catalog,
        references: &Catalog,
        radius: f64,
    ) -> Vec<CandidateSet> {
        let tree = SkyTree::new(references);
        targets
            .sources()
            .par_iter()
            .enumerate()
            .map(|(i, target)| candidate_set(&tree, references, i, target, radius))
            .collect()
    }
}
