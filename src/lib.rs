#![warn(missing_docs)]

//! Probabilistic cross-matching of two astronomical source catalogs whose coordinate frames
//! disagree by an unknown, smoothly varying distortion ("warped sky"). \
//! Source detection, photometry and catalog file formats are not included. This only pairs up
//! the sources of a target catalog with those of a reference catalog.
//!
//! ## Interface
//! The central struct of this library is [`Crossmatch`]. It takes both catalogs and a
//! [`MatchConfig`], and [`run`](Crossmatch::run()) iterates until no more matches are found:
//!
//! ```rust
//! # use warpmatch::{Catalog, Crossmatch, MatchConfig};
//! # fn solve(target: Catalog, reference: Catalog) -> Result<(), warpmatch::CrossmatchError> {
//! let result = Crossmatch::new(target, reference)
//!     .with_config(MatchConfig::default().with_confidence(0.9).with_flux_model(2))
//!     .run()?;
//! println!("{} matches, {} rejected", result.matches.len(), result.rejected.len());
//! # Ok(())
//! # }
//! ```
//!
//! Catalogs are built from [`Source`]s directly, or from a column-oriented [`Table`] through
//! [`Catalog::from_table`], which also resolves frequency-tagged column names.
//!
//! ## Algorithm
//! 1. The reference catalog is cut down to the footprint of the target catalog.
//! 2. Optionally, a smooth polynomial flux-ratio surface is fit from bright, unambiguous pairs
//!    and divided out of the target fluxes.
//! 3. An initial pass matches every target source to one of the reference sources within the
//!    search radius, scoring each candidate by the agreement in position and flux.
//! 4. Each following round fits a radial-basis-function model of the positional offsets
//!    through the matches so far, removes it from the unmatched target positions, and matches
//!    again. New matches that disagree with the offsets of their neighbours are rejected.
//! 5. Once a round adds nothing, a final pass pairs every remaining target with its most
//!    likely candidate regardless of confidence.
//!
//! With the `parallel` feature, [`Crossmatch::run_par()`] scores candidates in parallel and
//! returns the same result as the blocking run for the same seed.
//!
//! ## Parameters
//! - `multiple_match_confidence`: Minimum normalized probability of the best of several
//!     candidates.
//! - `single_match_confidence`: Minimum raw probability of a lone candidate.
//! - `flux_match`: Whether the flux agreement contributes to the probability.
//! - `snr_restriction`: SNR floor of target sources in the initial pass.
//! - `flux_model_degree`: Degree of the flux correction surface, if any.
//!
//! See [`MatchConfig`] for the remaining ones.

pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod flux;
pub(crate) mod geometry;
pub(crate) mod matching;
pub(crate) mod ndarray_utils;
pub(crate) mod offsets;
pub(crate) mod outliers;
pub(crate) mod prefilter;
pub(crate) mod probability;
pub(crate) mod rbf;
pub(crate) mod resolver;
pub mod schema;
pub(crate) mod search;
pub(crate) mod source;

pub use config::MatchConfig;
pub use error::CrossmatchError;
pub use flux::{PolynomialSurface, apply_flux_model, flux_model};
pub use matching::{Crossmatch, CrossmatchResult, Match, MatchStatus, RoundSummary};
pub use offsets::OffsetField;
pub use outliers::{is_outlier, reject_outliers};
pub use prefilter::reference_pre_filter;
pub use probability::{flux_budget, flux_prob, position_budget, position_prob};
pub use rbf::RbfSurface;
pub use resolver::{Resolution, Scores, resolve};
pub use schema::{ColumnMap, Table};
pub use search::{CandidateSet, nearest_within, search_around};
#[cfg(feature = "parallel")]
pub use search::search_around_par;
pub use source::{Catalog, Source, TargetCatalog};

/// A generic float trait such that the numeric kernels are generic over `f32`/`f64`.
///
/// This trait is automatically implemented for all types implementing the supertraits.
/// Particularly, this includes `f32` and `f64`.
/// [`num_traits::Float`] is not a supertrait as the need to specify the provider of the redundant definitions of the basic math functions would clutter the code.
pub trait Float: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}

impl<F> Float for F where F: Copy + Default + nalgebra::RealField + num_traits::FromPrimitive {}
