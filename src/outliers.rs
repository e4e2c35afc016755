//! Leave-one-out rejection of matches that disagree with the local offset field.

use itertools::Itertools;
use log::debug;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::CrossmatchError;
use crate::geometry::direction_difference;
use crate::matching::{Match, MatchStatus};
use crate::offsets::OffsetField;
use crate::probability::position_budget;

/// Largest tolerated angle between observed and predicted offset, in degrees.
const MAX_DIRECTION_DIFFERENCE: f64 = 45.;

/// Whether `m` contradicts the offsets predicted by `field`.
///
/// A match is an outlier if its offset points more than 45° away from the prediction while
/// being longer than it, or if its offset exceeds the prediction by more than the positional
/// error budget of the pair.
pub fn is_outlier(m: &Match, field: &OffsetField) -> bool {
    let observed = m.offset();
    let predicted = field.predict(m.target.ra, m.target.dec);
    let budget = position_budget(&m.reference, &m.target);

    let angle = direction_difference(&observed, &predicted);
    let wrong_direction = angle > MAX_DIRECTION_DIFFERENCE && predicted.norm() < observed.norm();
    let too_long = observed.norm() > predicted.norm() + budget;

    if wrong_direction || too_long {
        debug!(
            "Rejecting {} -> {}: offset {:.2e}° at {:.1}° from prediction {:.2e}°, budget {:.2e}°.",
            m.target.id,
            m.reference.id,
            observed.norm(),
            angle,
            predicted.norm(),
            budget
        );
    }
    wrong_direction || too_long
}

/// Check each of `candidates` against the field fit from every other match.
///
/// The other matches are all of `established` plus the candidates not rejected so far.
/// Candidates are visited in an order shuffled with `rng`; a candidate with fewer than two
/// other matches to compare against is kept.
///
/// Returns the kept and the rejected candidates, each in their original order.
///
/// Every candidate refits the field over all other matches, so a round with `k` candidates
/// and `n` matches costs `k` dense `n`-by-`n` solves.
pub fn reject_outliers<R: Rng + ?Sized>(
    established: &[Match],
    candidates: Vec<Match>,
    smoothing: f64,
    rng: &mut R,
) -> Result<(Vec<Match>, Vec<Match>), CrossmatchError> {
    let mut order = (0..candidates.len()).collect_vec();
    order.shuffle(rng);

    let mut rejected = vec![false; candidates.len()];
    for i in order {
        let others = established.iter().chain(
            candidates
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i && !rejected[*j])
                .map(|(_, m)| m),
        );
        if others.clone().count() < 2 {
            continue;
        }
        let field = OffsetField::fit(others, smoothing)?;
        rejected[i] = is_outlier(&candidates[i], &field);
    }

    let (rejected, kept): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .zip(rejected)
        .partition_map(|(mut m, r)| {
            if r {
                m.status = MatchStatus::Rejected;
                itertools::Either::Left(m)
            } else {
                itertools::Either::Right(m)
            }
        });
    Ok((kept, rejected))
}
