//! Column-oriented input tables and the mapping of their columns onto [`Source`] fields.
//!
//! Catalogs observed at several frequencies tag their column names with the frequency,
//! e.g. `peak_flux_181` or `181peak_flux`. A [`ColumnNaming`] describes the tagging, and
//! [`Table::resolve`] looks a logical column up through an ordered fallback:
//! 1. the bare name,
//! 2. the name tagged with an underscore,
//! 3. the name tagged without an underscore.
//!
//! When the naming carries a frequency range, the values of both tagged columns are linearly
//! interpolated to the requested frequency.

use std::collections::HashMap;

use log::{error, warn};

use crate::error::CrossmatchError;
use crate::source::{Catalog, Source};

/// Where the frequency tag sits in a column name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Affix {
    /// `<freq><column>`.
    Prefix,
    /// `<column><freq>`.
    Suffix,
}

/// The frequencies tagging the columns of a table.
#[derive(Clone, Debug, PartialEq)]
pub enum FrequencyTag {
    /// Every column is given at one frequency.
    Single(f64),
    /// Columns are given at two frequencies and interpolated to `target`.
    Range {
        /// Lower frequency.
        min: f64,
        /// Upper frequency.
        max: f64,
        /// Frequency to interpolate to.
        target: f64,
    },
}

/// How column names are tagged with frequencies.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ColumnNaming {
    /// Column names are used as they are.
    #[default]
    Plain,
    /// Column names carry a frequency tag.
    Tagged(Affix, FrequencyTag),
}

impl ColumnNaming {
    /// Tag `column` with `freq`, joined by `sep`.
    fn tag(affix: Affix, column: &str, freq: f64, sep: &str) -> String {
        match affix {
            Affix::Prefix => format!("{freq}{sep}{column}"),
            Affix::Suffix => format!("{column}{sep}{freq}"),
        }
    }
}

/// The outcome of a column lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    /// A column was found under `name`.
    Found {
        /// Physical column name.
        name: String,
        /// Column values.
        values: Vec<f64>,
    },
    /// The values were interpolated between two columns.
    Interpolated {
        /// Physical names of the lower and upper frequency columns.
        names: [String; 2],
        /// Interpolated values.
        values: Vec<f64>,
    },
    /// No column matched any of the tried names.
    Missing {
        /// Every name that was looked up, in order.
        tried: Vec<String>,
    },
}

impl Resolved {
    /// The values, if any were found.
    pub fn into_values(self) -> Option<Vec<f64>> {
        match self {
            Resolved::Found { values, .. } | Resolved::Interpolated { values, .. } => Some(values),
            Resolved::Missing { .. } => None,
        }
    }
}

/// An in-memory table of sources: an id per row plus named `f64` columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    ids: Vec<String>,
    columns: HashMap<String, Vec<f64>>,
    naming: ColumnNaming,
}

impl Table {
    /// Create a table with the given row ids and no columns.
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }

    /// Add a column, failing if it does not have one value per row.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, CrossmatchError> {
        let name = name.into();
        if values.len() != self.ids.len() {
            return Err(CrossmatchError::ColumnLength {
                column: name,
                expected: self.ids.len(),
                found: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(self)
    }

    /// Set how column names are tagged.
    pub fn with_naming(mut self, naming: ColumnNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The row ids.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// A column by its physical name.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Look up a value column, interpolating linearly in frequency if needed.
    pub fn resolve(&self, column: &str) -> Resolved {
        self.lookup(column, |(w1, v1), (w2, v2)| w1 * v1 + w2 * v2)
    }

    /// Look up an error column. Interpolated errors are combined in quadrature with the
    /// interpolation weights.
    pub fn resolve_error(&self, column: &str) -> Resolved {
        self.lookup(column, |(w1, e1), (w2, e2)| {
            ((w1 * e1).powi(2) + (w2 * e2).powi(2)).sqrt()
        })
    }

    fn lookup(&self, column: &str, combine: impl Fn((f64, f64), (f64, f64)) -> f64) -> Resolved {
        let mut tried = vec![column.to_string()];
        if let Some(values) = self.column(column) {
            return Resolved::Found {
                name: column.to_string(),
                values: values.to_vec(),
            };
        }

        let ColumnNaming::Tagged(affix, freq) = &self.naming else {
            return Resolved::Missing { tried };
        };
        for sep in ["_", ""] {
            match *freq {
                FrequencyTag::Single(f) => {
                    let name = ColumnNaming::tag(*affix, column, f, sep);
                    if let Some(values) = self.column(&name) {
                        return Resolved::Found {
                            name,
                            values: values.to_vec(),
                        };
                    }
                    tried.push(name);
                }
                FrequencyTag::Range { min, max, target } => {
                    let names = [
                        ColumnNaming::tag(*affix, column, min, sep),
                        ColumnNaming::tag(*affix, column, max, sep),
                    ];
                    if let (Some(low), Some(high)) = (self.column(&names[0]), self.column(&names[1]))
                    {
                        let w_low = (max - target) / (max - min);
                        let w_high = (target - min) / (max - min);
                        let values = low
                            .iter()
                            .zip(high)
                            .map(|(l, h)| combine((w_low, *l), (w_high, *h)))
                            .collect();
                        return Resolved::Interpolated { names, values };
                    }
                    tried.extend(names);
                }
            }
        }
        Resolved::Missing { tried }
    }
}

/// Physical names of the logical [`Source`] fields in a [`Table`].
///
/// The names are looked up through [`Table::resolve`], so they are given without frequency
/// tags. `ra`, `dec` and `peak_flux` are required; every other field is zero-filled when
/// missing.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnMap {
    /// Right ascension.
    pub ra: String,
    /// Declination.
    pub dec: String,
    /// Error on right ascension.
    pub err_ra: String,
    /// Error on declination.
    pub err_dec: String,
    /// Semi-major axis.
    pub a: String,
    /// Semi-minor axis.
    pub b: String,
    /// Position angle.
    pub pa: String,
    /// Local background noise.
    pub local_rms: String,
    /// Peak flux.
    pub peak_flux: String,
    /// Error on peak flux.
    pub err_peak_flux: String,
    /// PSF semi-major axis.
    pub psf_a: String,
    /// PSF semi-minor axis.
    pub psf_b: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            ra: "ra".into(),
            dec: "dec".into(),
            err_ra: "err_ra".into(),
            err_dec: "err_dec".into(),
            a: "a".into(),
            b: "b".into(),
            pa: "pa".into(),
            local_rms: "local_rms".into(),
            peak_flux: "peak_flux".into(),
            err_peak_flux: "err_peak_flux".into(),
            psf_a: "psf_a".into(),
            psf_b: "psf_b".into(),
        }
    }
}

impl Catalog {
    /// Build a catalog from the rows of `table`.
    ///
    /// Fails if a required column cannot be resolved or if ids repeat. Missing optional
    /// columns are logged and filled with zeros.
    pub fn from_table(table: &Table, columns: &ColumnMap) -> Result<Self, CrossmatchError> {
        let required = |name: &str| match table.resolve(name) {
            Resolved::Missing { tried } => {
                error!("Could not find column '{name}' (tried {tried:?}).");
                Err(CrossmatchError::MissingColumn {
                    column: name.to_string(),
                    tried,
                })
            }
            found => Ok(found.into_values().unwrap_or_default()),
        };
        let optional = |resolved: Resolved, name: &str| {
            resolved.into_values().unwrap_or_else(|| {
                warn!(
                    "No data found for the {name} column. Margin of error will now be tighter \
                     and probability of matches will be lower."
                );
                vec![0.; table.len()]
            })
        };

        let ra = required(&columns.ra)?;
        let dec = required(&columns.dec)?;
        let peak_flux = required(&columns.peak_flux)?;
        let err_ra = optional(table.resolve_error(&columns.err_ra), &columns.err_ra);
        let err_dec = optional(table.resolve_error(&columns.err_dec), &columns.err_dec);
        let a = optional(table.resolve(&columns.a), &columns.a);
        let b = optional(table.resolve(&columns.b), &columns.b);
        let pa = optional(table.resolve(&columns.pa), &columns.pa);
        let local_rms = optional(table.resolve(&columns.local_rms), &columns.local_rms);
        let err_peak_flux = optional(
            table.resolve_error(&columns.err_peak_flux),
            &columns.err_peak_flux,
        );
        let psf_a = optional(table.resolve(&columns.psf_a), &columns.psf_a);
        let psf_b = optional(table.resolve(&columns.psf_b), &columns.psf_b);

        let sources = table
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| Source {
                id: id.clone(),
                ra: ra[i],
                dec: dec[i],
                err_ra: err_ra[i],
                err_dec: err_dec[i],
                a: a[i],
                b: b[i],
                pa: pa[i],
                local_rms: local_rms[i],
                peak_flux: peak_flux[i],
                err_peak_flux: err_peak_flux[i],
                psf_a: psf_a[i],
                psf_b: psf_b[i],
            })
            .collect();
        Catalog::new(sources)
    }
}
