//! Choosing the counterpart of a single target source among its candidates.

use itertools::Itertools;
use ndarray::Array1;

use crate::config::MatchConfig;
use crate::ndarray_utils::argmax;
use crate::probability::{flux_prob, position_prob};
use crate::source::Source;

/// Per-candidate probabilities of one target source.
#[derive(Clone, Debug, PartialEq)]
pub struct Scores {
    /// Position probabilities.
    pub position: Array1<f64>,
    /// Flux probabilities. Computed even when flux matching is off, for reporting.
    pub flux: Array1<f64>,
    /// The probabilities the decision is based on.
    pub combined: Array1<f64>,
}

impl Scores {
    /// Score `candidates` against `target`.
    pub fn new(candidates: &[&Source], target: &Source, flux_match: bool) -> Self {
        let position = position_prob(candidates.iter().copied(), target);
        let flux = flux_prob(candidates.iter().copied(), target);
        let combined = if flux_match {
            &position * &flux
        } else {
            position.clone()
        };
        Self {
            position,
            flux,
            combined,
        }
    }

    /// Number of scored candidates.
    pub fn len(&self) -> usize {
        self.combined.len()
    }

    /// Whether there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    /// Keep only the candidates at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let pick = |arr: &Array1<f64>| indices.iter().map(|i| arr[*i]).collect();
        Self {
            position: pick(&self.position),
            flux: pick(&self.flux),
            combined: pick(&self.combined),
        }
    }
}

/// The accepted counterpart of a target source.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// Index of the chosen candidate within the scored candidates.
    pub candidate: usize,
    /// Its position probability.
    pub position_prob: f64,
    /// Its flux probability.
    pub flux_prob: f64,
    /// Its raw combined probability.
    pub combined_prob: f64,
    /// Its share of the combined probability of all surviving candidates.
    /// `None` if it was the only one.
    pub normalized_prob: Option<f64>,
    /// Number of candidates that competed.
    pub candidate_count: usize,
}

/// Round to two decimals, ties to even.
fn round2(x: f64) -> f64 {
    (x * 100.).round_ties_even() / 100.
}

/// Pick the most probable candidate, if it is probable enough.
///
/// Outside the final run, candidates whose combined probability rounds to zero at two decimals
/// are discarded first. Of several survivors, the best is accepted if its normalized
/// probability reaches `multiple_match_confidence`; a lone survivor is accepted if its raw
/// probability reaches `single_match_confidence`.
/// In the final run every candidate competes and the best one is always accepted.
///
/// The zero cutoff rounds the raw combined probability, not the normalized share. A candidate
/// with a tiny share but a raw probability above 0.005 therefore still competes.
pub fn resolve(scores: &Scores, config: &MatchConfig, final_run: bool) -> Option<Resolution> {
    let survivors = (0..scores.len())
        .filter(|i| final_run || round2(scores.combined[*i]) != 0.)
        .collect_vec();

    let resolution = |candidate: usize, normalized_prob: Option<f64>| Resolution {
        candidate,
        position_prob: scores.position[candidate],
        flux_prob: scores.flux[candidate],
        combined_prob: scores.combined[candidate],
        normalized_prob,
        candidate_count: survivors.len(),
    };

    match survivors.as_slice() {
        [] => None,
        [only] => (final_run || scores.combined[*only] >= config.single_match_confidence)
            .then(|| resolution(*only, None)),
        _ => {
            let combined: Array1<f64> = survivors.iter().map(|i| scores.combined[*i]).collect();
            let total = combined.sum();
            let best = argmax(combined.view());
            let normalized = (total > 0.).then(|| combined[best] / total);

            let confident =
                normalized.is_some_and(|p| p >= config.multiple_match_confidence);
            (final_run || confident).then(|| resolution(survivors[best], normalized))
        }
    }
}
