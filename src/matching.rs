//! The iterative cross-matching engine and its results.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use log::{debug, error, info, warn};
use nalgebra::Vector2;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MatchConfig;
use crate::error::CrossmatchError;
use crate::flux::{apply_flux_model, flux_model};
use crate::ndarray_utils::norm_axis;
use crate::offsets::OffsetField;
use crate::outliers::reject_outliers;
use crate::prefilter::reference_pre_filter;
use crate::resolver::{Scores, resolve};
use crate::search::{CandidateSet, search_around};
use crate::source::{Catalog, Source, TargetCatalog};

/// Matches needed before the offsets can be modelled.
const MIN_MATCHES: usize = 2;

/// Whether a match survived the outlier check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchStatus {
    /// Part of the confirmed matches.
    Accepted,
    /// Contradicted the offset field of the other matches.
    Rejected,
}

/// A target source paired with its reference counterpart.
#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    /// The target source at its original, uncorrected position.
    pub target: Source,
    /// The reference source.
    pub reference: Source,
    /// Position probability at the corrected target position.
    pub position_prob: f64,
    /// Flux probability.
    pub flux_prob: f64,
    /// Raw combined probability.
    pub combined_prob: f64,
    /// Share of the combined probability among the competing candidates.
    /// `None` if there was only one.
    pub normalized_prob: Option<f64>,
    /// Number of competing candidates.
    pub candidate_count: usize,
    /// Round the match was made in, starting at 1.
    pub round: usize,
    /// Outcome of the outlier check.
    pub status: MatchStatus,
}

impl Match {
    /// Offset `(Δra, Δdec)` of the target from the reference in degrees.
    ///
    /// `Δra` is wrapped into `[-180, 180)`.
    pub fn offset(&self) -> Vector2<f64> {
        let d_ra = (self.target.ra - self.reference.ra + 180.).rem_euclid(360.) - 180.;
        Vector2::new(d_ra, self.target.dec - self.reference.dec)
    }

    /// A certain match of `target` and `reference`.
    #[cfg(test)]
    pub(crate) fn new(target: Source, reference: Source) -> Self {
        Self {
            target,
            reference,
            position_prob: 1.,
            flux_prob: 1.,
            combined_prob: 1.,
            normalized_prob: None,
            candidate_count: 1,
            round: 0,
            status: MatchStatus::Accepted,
        }
    }
}

/// Pool sizes at the end of a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundSummary {
    /// Round number, starting at 1.
    pub round: usize,
    /// Confirmed matches so far.
    pub matched: usize,
    /// Rejected matches so far.
    pub rejected: usize,
    /// Unmatched target sources.
    pub leftover_target: usize,
    /// Unmatched reference sources.
    pub leftover_reference: usize,
}

/// Everything a converged run produces.
#[derive(Clone, Debug, PartialEq)]
pub struct CrossmatchResult {
    /// Confirmed matches in the order they were made.
    pub matches: Vec<Match>,
    /// Matches rejected as outliers.
    pub rejected: Vec<Match>,
    /// Unmatched reference sources, after prefiltering.
    pub leftover_reference: Catalog,
    /// Unmatched target sources at their original positions.
    pub leftover_target: Catalog,
    /// Unmatched target sources at their offset-corrected positions.
    pub leftover_target_adjusted: Catalog,
    /// Number of sources in the target catalog.
    pub target_count: usize,
    /// Whether the rounds stopped adding matches before the round limit.
    pub converged: bool,
    /// Pool sizes after each round, the final pass included.
    pub history: Vec<RoundSummary>,
}

/// Candidate search plus scoring of one pass.
type Scorer = fn(&Catalog, &Catalog, &MatchConfig, &Forbidden) -> Vec<(CandidateSet, Scores)>;

/// Reference ids a target may no longer be paired with, by target id.
type Forbidden = HashMap<String, HashSet<String>>;

fn score_set(
    mut set: CandidateSet,
    targets: &Catalog,
    references: &Catalog,
    flux_match: bool,
    forbidden: &Forbidden,
) -> (CandidateSet, Scores) {
    let target = &targets[set.target];
    if let Some(banned) = forbidden.get(&target.id) {
        set.retain(|c| !banned.contains(&references[c].id));
    }
    let candidates = set.candidates.iter().map(|c| &references[*c]).collect_vec();
    let scores = Scores::new(&candidates, target, flux_match);
    (set, scores)
}

fn score_candidates(
    targets: &Catalog,
    references: &Catalog,
    config: &MatchConfig,
    forbidden: &Forbidden,
) -> Vec<(CandidateSet, Scores)> {
    search_around(targets, references, config.search_radius)
        .into_iter()
        .map(|set| score_set(set, targets, references, config.flux_match, forbidden))
        .collect()
}

/// One matching pass over the unmatched sources.
///
/// Candidates are searched and scored at the adjusted target positions. Targets are then
/// resolved in catalog order, and a reference taken by an earlier target is no longer
/// available to later ones.
///
/// Returns the new matches; the pools are left untouched.
fn cross_match_pass(
    targets: &TargetCatalog,
    references: &Catalog,
    config: &MatchConfig,
    forbidden: &Forbidden,
    round: usize,
    final_run: bool,
    scorer: Scorer,
) -> Vec<Match> {
    if final_run {
        info!(
            "Returning most likely match to remaining {} unmatched sources.",
            targets.len()
        );
    } else {
        info!("Matching {} target sources.", targets.len());
    }

    let scored = scorer(targets.adjusted(), references, config, forbidden);
    let mut claimed = vec![false; references.len()];
    scored
        .into_iter()
        .filter_map(|(set, scores)| {
            let open = (0..set.candidates.len())
                .filter(|k| !claimed[set.candidates[*k]])
                .collect_vec();
            let resolution = resolve(&scores.select(&open), config, final_run)?;
            let reference = set.candidates[open[resolution.candidate]];
            claimed[reference] = true;

            Some(Match {
                target: targets.original()[set.target].clone(),
                reference: references[reference].clone(),
                position_prob: resolution.position_prob,
                flux_prob: resolution.flux_prob,
                combined_prob: resolution.combined_prob,
                normalized_prob: resolution.normalized_prob,
                candidate_count: resolution.candidate_count,
                round,
                status: MatchStatus::Accepted,
            })
        })
        .collect()
}

/// Log how well the field reproduces the offsets it was fit from.
fn log_residuals(field: &OffsetField, matches: &[Match], round: usize) {
    let observed = Array2::from(
        matches
            .iter()
            .map(|m| {
                let o = m.offset();
                [o.x, o.y]
            })
            .collect_vec(),
    );
    let positions = Array2::from(
        matches
            .iter()
            .map(|m| [m.target.ra, m.target.dec])
            .collect_vec(),
    );
    let residuals = observed - field.predict_many(positions.view());
    let norms = norm_axis(residuals.view(), Axis(1)) * 3600.;
    debug!(
        "Round {}: offset model residuals over {} matches, mean {:.3}\", max {:.3}\".",
        round,
        norms.len(),
        norms.mean().unwrap_or(0.),
        norms.iter().copied().fold(0., f64::max)
    );
}

/// The mutable state of a run between rounds.
struct Pools {
    targets: TargetCatalog,
    references: Catalog,
    matches: Vec<Match>,
    rejected: Vec<Match>,
    forbidden: Forbidden,
    history: Vec<RoundSummary>,
}

impl Pools {
    fn new(targets: Catalog, references: Catalog) -> Self {
        Self {
            targets: TargetCatalog::new(targets),
            references,
            matches: Vec::new(),
            rejected: Vec::new(),
            forbidden: Forbidden::new(),
            history: Vec::new(),
        }
    }

    /// Confirm `matches`, removing their sources from the unmatched pools.
    fn confirm(&mut self, matches: Vec<Match>) {
        let target_ids: HashSet<String> = matches.iter().map(|m| m.target.id.clone()).collect();
        let reference_ids: HashSet<String> =
            matches.iter().map(|m| m.reference.id.clone()).collect();
        self.targets = self.targets.without(&target_ids);
        self.references = self.references.without(&reference_ids);
        self.matches.extend(matches);
    }

    /// Record rejected matches and forbid their pairing in the remaining rounds.
    ///
    /// Both sources return to the unmatched pools. The ban does not hold in the final pass.
    fn reject(&mut self, rejected: Vec<Match>) {
        for m in &rejected {
            self.forbidden
                .entry(m.target.id.clone())
                .or_default()
                .insert(m.reference.id.clone());
        }
        self.rejected.extend(rejected);
    }

    /// One matching round on the unmatched sources, offsets corrected by `field`.
    ///
    /// Returns the number of matches confirmed.
    fn advance<R: Rng + ?Sized>(
        &mut self,
        field: &OffsetField,
        config: &MatchConfig,
        round: usize,
        scorer: Scorer,
        rng: &mut R,
    ) -> Result<usize, CrossmatchError> {
        let adjusted = field.correct(self.targets.original());
        self.targets = self.targets.with_adjusted_positions(adjusted.view());

        let candidates = cross_match_pass(
            &self.targets,
            &self.references,
            config,
            &self.forbidden,
            round,
            false,
            scorer,
        );
        let (kept, rejected) =
            reject_outliers(&self.matches, candidates, config.offset_smoothing, rng)?;
        debug!(
            "Round {}: {} new matches, {} rejected.",
            round,
            kept.len(),
            rejected.len()
        );

        let added = kept.len();
        self.confirm(kept);
        self.reject(rejected);
        self.summarize(round);
        Ok(added)
    }

    /// The relaxed pass giving every remaining target its most likely candidate.
    fn finish(&mut self, config: &MatchConfig, round: usize, scorer: Scorer) {
        let last = cross_match_pass(
            &self.targets,
            &self.references,
            config,
            &Forbidden::new(),
            round,
            true,
            scorer,
        );
        self.confirm(last);
        self.summarize(round);
    }

    fn summarize(&mut self, round: usize) {
        self.history.push(RoundSummary {
            round,
            matched: self.matches.len(),
            rejected: self.rejected.len(),
            leftover_target: self.targets.len(),
            leftover_reference: self.references.len(),
        });
    }
}

/// Cross-matching of a target catalog against a reference catalog.
///
/// Use [`MatchConfig`] through [`with_config`](Crossmatch::with_config()) to tune the run.
///
/// # Example:
/// ```
/// # use warpmatch::{Catalog, Crossmatch, MatchConfig, Source};
/// let sources = |prefix: &str, shift: f64| -> Vec<Source> {
///     (0..3)
///         .map(|i| {
///             Source::new(format!("{prefix}{i}"), 10. + i as f64 + shift, -20., 1.)
///                 .with_psf(36., 36.)
///                 .with_noise(0.1, 0.)
///         })
///         .collect()
/// };
/// let target = Catalog::new(sources("t", 0.001)).unwrap();
/// let reference = Catalog::new(sources("r", 0.)).unwrap();
///
/// let result = Crossmatch::new(target, reference)
///     .with_config(MatchConfig::default().with_seed(0))
///     .run()
///     .unwrap();
/// assert_eq!(result.matches.len(), 3);
/// ```
#[derive(Clone, Debug)]
pub struct Crossmatch {
    target: Catalog,
    reference: Catalog,
    config: MatchConfig,
}

impl Crossmatch {
    /// Match `target` against `reference` with the default configuration.
    pub fn new(target: Catalog, reference: Catalog) -> Self {
        Self {
            target,
            reference,
            config: MatchConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: MatchConfig) -> Self {
        self.config = config;
        self
    }

    /// The random source for the outlier rejection order.
    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Run the cross match until it converges.
    ///
    /// The rejection order is seeded from the configured seed, or from the operating system.
    pub fn run(&self) -> Result<CrossmatchResult, CrossmatchError> {
        let mut rng = self.rng();
        self.execute(&mut rng, score_candidates)
    }

    /// Run the cross match, shuffling the rejection order with `rng`.
    pub fn run_with_rng<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<CrossmatchResult, CrossmatchError> {
        self.execute(rng, score_candidates)
    }

    fn execute<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        scorer: Scorer,
    ) -> Result<CrossmatchResult, CrossmatchError> {
        let config = &self.config;
        config.validate()?;

        let references = reference_pre_filter(&self.target, &self.reference);
        info!(
            "The filtered reference catalog has {} of {} entries.",
            references.len(),
            self.reference.len()
        );

        let target = match config.flux_model_degree {
            Some(degree) => {
                let model = flux_model(
                    &self.target,
                    &references,
                    degree,
                    config.flux_match_radius,
                )?;
                apply_flux_model(&self.target, &model)
            }
            None => self.target.clone(),
        };

        let mut pools = Pools::new(target, references);

        info!("Round 1.");
        let initial_targets = match config.snr_restriction {
            Some(snr) => pools.targets.filter(|s| s.snr() >= snr),
            None => pools.targets.clone(),
        };
        let initial = cross_match_pass(
            &initial_targets,
            &pools.references,
            config,
            &pools.forbidden,
            1,
            false,
            scorer,
        );
        if initial.len() < MIN_MATCHES {
            error!(
                "Cannot model offsets from {} match(es). Consider relaxing the confidence \
                 thresholds or check that the column units are correct.",
                initial.len()
            );
            return Err(CrossmatchError::TooFewMatches {
                found: initial.len(),
                required: MIN_MATCHES,
            });
        }
        pools.confirm(initial);
        pools.summarize(1);

        let mut round = 1;
        let mut converged = false;
        for _ in 0..config.max_rounds {
            round += 1;
            info!(
                "Round {}. Number of cross matches so far: {}.",
                round,
                pools.matches.len()
            );

            let field = OffsetField::fit(&pools.matches, config.offset_smoothing)?;
            if config.diagnostics {
                log_residuals(&field, &pools.matches, round);
            }
            if pools.advance(&field, config, round, scorer, rng)? == 0 {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                "No convergence after {} rounds; proceeding to the final pass.",
                config.max_rounds
            );
        }

        round += 1;
        pools.finish(config, round, scorer);

        info!(
            "Matched {} out of {} sources in target catalog.",
            pools.matches.len(),
            self.target.len()
        );

        let (leftover_target, leftover_target_adjusted) = pools.targets.into_parts();
        Ok(CrossmatchResult {
            matches: pools.matches,
            rejected: pools.rejected,
            leftover_reference: pools.references,
            leftover_target,
            leftover_target_adjusted,
            target_count: self.target.len(),
            converged,
            history: pools.history,
        })
    }
}

#[cfg(feature = "parallel")]
mod parallel {
    use super::*;
    use crate::search::search_around_par;
    use rayon::prelude::*;

    fn score_candidates_par(
        targets: &Catalog,
        references: &Catalog,
        config: &MatchConfig,
        forbidden: &Forbidden,
    ) -> Vec<(CandidateSet, Scores)> {
        search_around_par(targets, references, config.search_radius)
            .into_par_iter()
            .map(|set| score_set(set, targets, references, config.flux_match, forbidden))
            .collect()
    }

    impl Crossmatch {
        /// Run the cross match until it converges, scoring candidates in parallel.
        ///
        /// Resolution stays serial, so the result equals the one of [`run`](Crossmatch::run())
        /// for the same seed.
        pub fn run_par(&self) -> Result<CrossmatchResult, CrossmatchError> {
            let mut rng = self.rng();
            self.execute(&mut rng, score_candidates_par)
        }

        /// Run the cross match in parallel, shuffling the rejection order with `rng`.
        ///
        /// Also see [`run_with_rng`](Crossmatch::run_with_rng()) for more details.
        pub fn run_with_rng_par<R: Rng + ?Sized>(
            &self,
            rng: &mut R,
        ) -> Result<CrossmatchResult, CrossmatchError> {
            self.execute(rng, score_candidates_par)
        }
    }
}

#[cfg(test)]
mod tests {
    use itertools::iproduct;
    use simplelog::{Config, LevelFilter, TestLogger};

    use super::*;

    fn init_logger() {
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
    }

    fn source(id: &str, ra: f64, dec: f64, flux: f64) -> Source {
        Source::new(id, ra, dec, flux)
            .with_psf(36., 36.)
            .with_noise(0.1, 0.)
    }

    fn catalog(sources: Vec<Source>) -> Catalog {
        Catalog::new(sources).unwrap()
    }

    fn ids(catalog: &Catalog) -> HashSet<String> {
        catalog.ids().map(str::to_string).collect()
    }

    #[test]
    fn coincident_pairs() {
        init_logger();
        let targets = catalog(vec![
            source("t0", 10., 0., 1.),
            source("t1", 11., 0., 2.),
            source("t2", 12., 0., 3.),
        ]);
        let references = catalog(vec![
            source("r0", 10., 0., 1.),
            source("r1", 11., 0., 2.),
            source("r2", 12., 0., 3.),
        ]);
        let config = MatchConfig::default().with_confidence(0.5).with_seed(1);

        let result = Crossmatch::new(targets, references)
            .with_config(config)
            .run()
            .unwrap();

        assert_eq!(result.matches.len(), 3);
        for m in &result.matches {
            assert_eq!(m.target.id[1..], m.reference.id[1..]);
            assert_eq!(m.round, 1);
            assert_eq!(m.combined_prob, 1.);
        }
        assert!(result.rejected.is_empty());
        assert!(result.leftover_target.is_empty());
        assert!(result.leftover_reference.is_empty());
        assert!(result.converged);
    }

    #[test]
    fn flux_breaks_tie() {
        init_logger();
        let targets = catalog(vec![
            source("anchor_a", 10., 0., 1.),
            source("x", 20., 0., 1.),
            source("anchor_b", 30., 0., 1.),
        ]);
        let references = catalog(vec![
            source("ra", 10., 0., 1.),
            source("bright", 20., -0.002, 5.),
            source("consistent", 20., 0.002, 1.),
            source("rb", 30., 0., 1.),
        ]);
        let config = MatchConfig::default().with_confidence(0.9).with_seed(1);

        let result = Crossmatch::new(targets, references)
            .with_config(config)
            .run()
            .unwrap();

        let x = result
            .matches
            .iter()
            .filter(|m| m.target.id == "x")
            .collect_vec();
        assert_eq!(x.len(), 1);
        assert_eq!(x[0].reference.id, "consistent");
        assert_eq!(ids(&result.leftover_reference), HashSet::from(["bright".to_string()]));
    }

    #[test]
    fn too_few_initial_matches() {
        init_logger();
        let targets = catalog(vec![source("t0", 10., 0., 1.), source("t1", 50., 0., 1.)]);
        let references = catalog(vec![source("r0", 10., 0., 1.), source("r1", 12., 0., 1.)]);

        let result = Crossmatch::new(targets, references).run();
        assert_eq!(
            result,
            Err(CrossmatchError::TooFewMatches {
                found: 1,
                required: 2
            })
        );
    }

    /// A 4x4 grid of bright pairs shifted by 0.01° in ra, and a faint pair at (11.5, 11.5)
    /// shifted by -0.03° in dec.
    fn deviant_catalogs() -> (Catalog, Catalog) {
        let (mut targets, mut references): (Vec<_>, Vec<_>) = iproduct!(0..4, 0..4)
            .map(|(i, j)| {
                let (ra, dec) = (10. + i as f64, 10. + j as f64);
                (
                    source(&format!("t{i}{j}"), ra + 0.01, dec, 1.),
                    source(&format!("r{i}{j}"), ra, dec, 1.),
                )
            })
            .unzip();
        targets.push(
            Source::new("tx", 11.5, 11.47, 0.5)
                .with_psf(360., 360.)
                .with_noise(0.1, 0.),
        );
        references.push(
            Source::new("rx", 11.5, 11.5, 0.5)
                .with_psf(360., 360.)
                .with_noise(0.1, 0.),
        );
        (catalog(targets), catalog(references))
    }

    #[test]
    fn deviant_match_rejected() {
        init_logger();
        let (targets, references) = deviant_catalogs();
        let config = MatchConfig::default()
            .with_confidence(0.5)
            .with_snr_restriction(8.)
            .with_diagnostics(true)
            .with_seed(5);

        let result = Crossmatch::new(targets, references)
            .with_config(config)
            .run()
            .unwrap();

        assert_eq!(result.rejected.len(), 1);
        let rejected = &result.rejected[0];
        assert_eq!(rejected.target.id, "tx");
        assert_eq!(rejected.reference.id, "rx");
        assert_eq!(rejected.round, 2);
        assert_eq!(rejected.status, MatchStatus::Rejected);

        // the final pass still pairs tx with its only candidate
        assert_eq!(result.matches.len(), 17);
        assert!(result.matches[..16].iter().all(|m| m.round == 1));
        let last = &result.matches[16];
        assert_eq!((last.target.id.as_str(), last.reference.id.as_str()), ("tx", "rx"));
        assert_eq!(last.round, 3);
        assert_eq!(last.status, MatchStatus::Accepted);
        assert!(result.leftover_target.is_empty());
        assert!(result.leftover_reference.is_empty());
        assert!(result.converged);
    }

    fn assert_disjoint(pools: &Pools) {
        let matched_targets: HashSet<String> =
            pools.matches.iter().map(|m| m.target.id.clone()).collect();
        let matched_references: HashSet<String> =
            pools.matches.iter().map(|m| m.reference.id.clone()).collect();
        assert_eq!(matched_targets.len(), pools.matches.len());
        assert_eq!(matched_references.len(), pools.matches.len());
        assert!(matched_targets.is_disjoint(&ids(pools.targets.original())));
        assert!(matched_references.is_disjoint(&ids(&pools.references)));
    }

    #[test]
    fn rejected_target_recontends() {
        init_logger();
        let (targets, references) = deviant_catalogs();
        let config = MatchConfig::default().with_confidence(0.5);
        let mut rng = StdRng::seed_from_u64(5);
        let mut pools = Pools::new(targets, references);

        let bright = pools.targets.filter(|s| s.snr() >= 8.);
        let initial = cross_match_pass(
            &bright,
            &pools.references,
            &config,
            &pools.forbidden,
            1,
            false,
            score_candidates,
        );
        assert_eq!(initial.len(), 16);
        pools.confirm(initial);
        assert_disjoint(&pools);

        let field = OffsetField::fit(&pools.matches, config.offset_smoothing).unwrap();
        let added = pools
            .advance(&field, &config, 2, score_candidates, &mut rng)
            .unwrap();
        assert_eq!(added, 0);
        assert_disjoint(&pools);
        assert_eq!(pools.rejected.len(), 1);
        assert_eq!(ids(pools.targets.original()), HashSet::from(["tx".to_string()]));
        assert!(pools.references.get("rx").is_some());
        // the adjusted view has the grid shift removed
        assert!((pools.targets.adjusted()[0].ra - 11.49).abs() < 1e-3);
        assert_eq!(pools.targets.original()[0].ra, 11.5);

        // the rejected pairing is not offered again in a matching round
        let added = pools
            .advance(&field, &config, 3, score_candidates, &mut rng)
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(pools.rejected.len(), 1);
        assert_disjoint(&pools);

        pools.finish(&config, 4, score_candidates);
        assert_disjoint(&pools);
        assert!(pools.targets.is_empty());
        let last = pools.matches.last().unwrap();
        assert_eq!((last.target.id.as_str(), last.reference.id.as_str()), ("tx", "rx"));
        assert_eq!(last.round, 4);
        assert_eq!(
            pools.history.iter().map(|h| h.round).collect_vec(),
            vec![2, 3, 4]
        );
    }

    /// Reference sources scattered over a few degrees, and targets warped by a smooth field.
    fn warped_catalogs(seed: u64) -> (Catalog, Catalog) {
        let mut rng = StdRng::seed_from_u64(seed);
        let references = (0..60)
            .map(|i| {
                source(
                    &format!("r{i}"),
                    rng.random_range(100.0..103.0),
                    rng.random_range(-31.0..-28.0),
                    rng.random_range(1.0..10.0),
                )
            })
            .collect_vec();
        let targets = references
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 7 != 0)
            .map(|(i, r)| {
                let d_ra = 0.004 * (r.dec + 29.5);
                let d_dec = -0.003 * (r.ra - 101.5);
                source(
                    &format!("t{i}"),
                    r.ra + d_ra + rng.random_range(-0.001..0.001),
                    r.dec + d_dec + rng.random_range(-0.001..0.001),
                    r.peak_flux + rng.random_range(-0.02..0.02),
                )
            })
            .collect_vec();
        (catalog(targets), catalog(references))
    }

    #[test]
    fn pools_stay_disjoint() {
        init_logger();
        let (targets, references) = warped_catalogs(11);
        let n_targets = targets.len();
        let result = Crossmatch::new(targets, references)
            .with_config(MatchConfig::default().with_seed(3))
            .run()
            .unwrap();

        let matched_targets: HashSet<String> =
            result.matches.iter().map(|m| m.target.id.clone()).collect();
        let matched_references: HashSet<String> =
            result.matches.iter().map(|m| m.reference.id.clone()).collect();
        assert_eq!(matched_targets.len(), result.matches.len());
        assert_eq!(matched_references.len(), result.matches.len());
        assert!(matched_targets.is_disjoint(&ids(&result.leftover_target)));
        assert!(matched_references.is_disjoint(&ids(&result.leftover_reference)));
        assert_eq!(matched_targets.len() + result.leftover_target.len(), n_targets);
        assert_eq!(
            ids(&result.leftover_target),
            ids(&result.leftover_target_adjusted)
        );
        assert_eq!(result.target_count, n_targets);
    }

    #[test]
    fn pools_shrink_every_round() {
        init_logger();
        let (targets, references) = warped_catalogs(12);
        let result = Crossmatch::new(targets, references)
            .with_config(MatchConfig::default().with_seed(4))
            .run()
            .unwrap();

        assert!(result.history.len() >= 3);
        for (before, after) in result.history.iter().tuple_windows() {
            assert_eq!(after.round, before.round + 1);
            assert!(after.leftover_target <= before.leftover_target);
            assert!(after.leftover_reference <= before.leftover_reference);
            assert!(after.matched >= before.matched);
        }
    }

    #[test]
    fn seeded_runs_agree() {
        init_logger();
        let (targets, references) = warped_catalogs(13);
        let crossmatch =
            Crossmatch::new(targets, references).with_config(MatchConfig::default().with_seed(9));
        assert_eq!(crossmatch.run().unwrap(), crossmatch.run().unwrap());
    }

    #[test]
    fn final_pass_is_idempotent() {
        let targets = TargetCatalog::new(catalog(vec![
            source("t0", 10., 0., 1.),
            source("t1", 10.01, 0., 1.),
        ]));
        let references = catalog(vec![source("r0", 10.005, 0., 1.), source("r1", 10.15, 0., 3.)]);
        let config = MatchConfig::default();
        let forbidden = Forbidden::new();

        let pass = || {
            cross_match_pass(
                &targets,
                &references,
                &config,
                &forbidden,
                5,
                true,
                score_candidates,
            )
        };
        let first = pass();
        assert_eq!(first, pass());
        // r0 is claimed by t0, t1 falls back to r1
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].reference.id, "r0");
        assert_eq!(first[1].reference.id, "r1");
        assert_eq!(first[1].candidate_count, 1);
    }

    #[test]
    fn forbidden_pairs_skipped_until_final_pass() {
        let targets = catalog(vec![source("t0", 10., 0., 1.)]);
        let references = catalog(vec![source("r0", 10., 0., 1.)]);
        let config = MatchConfig::default();
        let mut pools = Pools::new(targets, references);
        pools.forbidden = Forbidden::from([("t0".to_string(), HashSet::from(["r0".to_string()]))]);

        let matches = cross_match_pass(
            &pools.targets,
            &pools.references,
            &config,
            &pools.forbidden,
            2,
            false,
            score_candidates,
        );
        assert!(matches.is_empty());

        pools.finish(&config, 3, score_candidates);
        assert_eq!(pools.matches.len(), 1);
        assert_eq!(pools.matches[0].reference.id, "r0");
        assert!(pools.targets.is_empty());
        assert!(pools.references.is_empty());
    }

    #[test]
    fn flux_calibration_needs_samples() {
        init_logger();
        let targets = catalog(vec![source("t0", 10., 0., 1.), source("t1", 11., 0., 1.)]);
        let references = catalog(vec![source("r0", 10., 0., 1.), source("r1", 11., 0., 1.)]);

        let result = Crossmatch::new(targets, references)
            .with_config(MatchConfig::default().with_flux_model(2))
            .run();
        assert_eq!(
            result,
            Err(CrossmatchError::InsufficientFluxSamples {
                found: 2,
                required: 9
            })
        );
    }

    #[test]
    fn invalid_config() {
        let targets = catalog(vec![source("t0", 10., 0., 1.)]);
        let result = Crossmatch::new(targets.clone(), targets)
            .with_config(MatchConfig::default().with_confidence(2.))
            .run();
        assert!(matches!(result, Err(CrossmatchError::InvalidConfig(_))));
    }

    #[test]
    fn offset_wraps() {
        let m = Match::new(source("t", 359.999, 1., 1.), source("r", 0.001, 0.5, 1.));
        let offset = m.offset();
        assert!((offset.x + 0.002).abs() < 1e-9);
        assert!((offset.y - 0.5).abs() < 1e-12);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_matches_blocking() {
        init_logger();
        let (targets, references) = warped_catalogs(14);
        let crossmatch =
            Crossmatch::new(targets, references).with_config(MatchConfig::default().with_seed(2));
        assert_eq!(crossmatch.run().unwrap(), crossmatch.run_par().unwrap());
    }
}
