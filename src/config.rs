//! Matching parameters.

use crate::error::CrossmatchError;

/// Everything a cross-matching run can be tuned with.
///
/// Create it with [`MatchConfig::default()`] and adjust it through the `with_*` functions.
/// All angles are in degrees.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchConfig {
    /// Minimum normalized probability of the best of several candidates.
    pub multiple_match_confidence: f64,
    /// Minimum raw probability of a lone candidate.
    pub single_match_confidence: f64,
    /// Whether the flux agreement contributes to the match probability.
    pub flux_match: bool,
    /// Only target sources at or above this SNR take part in the first pass.
    pub snr_restriction: Option<f64>,
    /// Degree of the flux correction surface. `None` disables flux calibration.
    pub flux_model_degree: Option<usize>,
    /// Log offset-field diagnostics at debug level. Never changes the outcome.
    pub diagnostics: bool,
    /// Radius of the coarse candidate search.
    pub search_radius: f64,
    /// Radius of the tight nearest-neighbour match used for flux calibration.
    pub flux_match_radius: f64,
    /// Smoothing of the offset field.
    pub offset_smoothing: f64,
    /// Maximum number of rounds before the final pass is forced.
    pub max_rounds: usize,
    /// Seed of the outlier rejection order. `None` seeds from the operating system.
    pub seed: Option<u64>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            multiple_match_confidence: 0.8,
            single_match_confidence: 0.8,
            flux_match: true,
            snr_restriction: None,
            flux_model_degree: None,
            diagnostics: false,
            search_radius: 600. / 3600.,
            flux_match_radius: 118. / 3600.,
            offset_smoothing: 0.032777778,
            max_rounds: 100,
            seed: None,
        }
    }
}

impl MatchConfig {
    /// Set both confidence thresholds at once.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.multiple_match_confidence = confidence;
        self.single_match_confidence = confidence;
        self
    }

    /// Set the threshold for targets with several candidates.
    pub fn with_multiple_match_confidence(mut self, confidence: f64) -> Self {
        self.multiple_match_confidence = confidence;
        self
    }

    /// Set the threshold for targets with a single candidate.
    pub fn with_single_match_confidence(mut self, confidence: f64) -> Self {
        self.single_match_confidence = confidence;
        self
    }

    /// Enable or disable flux matching.
    pub fn with_flux_match(mut self, flux_match: bool) -> Self {
        self.flux_match = flux_match;
        self
    }

    /// Restrict the first pass to target sources of at least this SNR.
    pub fn with_snr_restriction(mut self, snr: f64) -> Self {
        self.snr_restriction = Some(snr);
        self
    }

    /// Calibrate target fluxes with a surface of this degree.
    pub fn with_flux_model(mut self, degree: usize) -> Self {
        self.flux_model_degree = Some(degree);
        self
    }

    /// Enable diagnostic logging.
    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Set the coarse candidate search radius.
    pub fn with_search_radius(mut self, radius: f64) -> Self {
        self.search_radius = radius;
        self
    }

    /// Set the flux calibration match radius.
    pub fn with_flux_match_radius(mut self, radius: f64) -> Self {
        self.flux_match_radius = radius;
        self
    }

    /// Set the offset field smoothing.
    pub fn with_offset_smoothing(mut self, smoothing: f64) -> Self {
        self.offset_smoothing = smoothing;
        self
    }

    /// Set the maximum number of rounds.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Seed the outlier rejection order.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), CrossmatchError> {
        let invalid = |msg: String| Err(CrossmatchError::InvalidConfig(msg));

        for (name, value) in [
            ("multiple_match_confidence", self.multiple_match_confidence),
            ("single_match_confidence", self.single_match_confidence),
        ] {
            if !(0. ..=1.).contains(&value) {
                return invalid(format!("{name} must lie in [0, 1], got {value}"));
            }
        }
        if let Some(snr) = self.snr_restriction {
            if !snr.is_finite() {
                return invalid(format!("snr_restriction must be finite, got {snr}"));
            }
        }
        if let Some(degree) = self.flux_model_degree {
            if !(1..=5).contains(&degree) {
                return invalid(format!("flux_model_degree must lie in 1..=5, got {degree}"));
            }
        }
        for (name, value) in [
            ("search_radius", self.search_radius),
            ("flux_match_radius", self.flux_match_radius),
        ] {
            if !(value > 0. && value < 180.) {
                return invalid(format!("{name} must lie in (0, 180), got {value}"));
            }
        }
        if !(self.offset_smoothing.is_finite() && self.offset_smoothing >= 0.) {
            return invalid(format!(
                "offset_smoothing must be non-negative, got {}",
                self.offset_smoothing
            ));
        }
        if self.max_rounds == 0 {
            return invalid("max_rounds must be positive".into());
        }
        Ok(())
    }
}
