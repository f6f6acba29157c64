//! Feature families and the fitted extraction pipeline

mod char_distribution;
mod entropy;
mod length;
mod pipeline;

pub use char_distribution::{char_distribution, CHAR_DISTRIBUTION_BINS};
pub use entropy::shannon_entropy;
pub use length::{length_counts, LengthCounts};
pub use pipeline::{FeaturePipeline, FeatureVector, FieldTransformer};

use crate::error::{Result, WafError};
use crate::request::{FieldMap, Request};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Feature family. Declaration order is the column order of a fitted pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    CharDistribution,
    Entropy,
    Length,
    Raw,
}

impl Family {
    pub fn tag(&self) -> &'static str {
        match self {
            Family::CharDistribution => "CharDis",
            Family::Entropy => "Entropy",
            Family::Length => "Length",
            Family::Raw => "RawData",
        }
    }

    pub fn sub_parts(&self) -> &'static [&'static str] {
        match self {
            Family::CharDistribution => &["N1B0", "N1B1", "N1B2", "N1B3", "N1B4"],
            Family::Entropy => &["-"],
            Family::Length => &["ALL", "DIGIT", "ALPHA", "OTHER"],
            Family::Raw => &["-"],
        }
    }

    /// Raw data is kept for inspection and never fed to a scorer
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Family::Raw)
    }

    /// Numeric sub-vector for one value; empty for the raw family
    pub fn evaluate(&self, value: &str) -> Vec<f64> {
        match self {
            Family::CharDistribution => char_distribution(value).to_vec(),
            Family::Entropy => vec![shannon_entropy(value)],
            Family::Length => length_counts(value).to_vec(),
            Family::Raw => Vec::new(),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Where a transformer reads its input from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// The whole canonical request text
    Request,
    Headers,
    QueryParams,
    BodyParams,
}

impl FieldSource {
    pub fn tag(&self) -> &'static str {
        match self {
            FieldSource::Request => "Rq",
            FieldSource::Headers => "He",
            FieldSource::QueryParams => "Qp",
            FieldSource::BodyParams => "Bp",
        }
    }

    pub fn is_per_field(&self) -> bool {
        !matches!(self, FieldSource::Request)
    }

    /// The request map this source reads, `None` for the whole request
    pub fn fields<'r>(&self, request: &'r Request) -> Option<&'r FieldMap> {
        match self {
            FieldSource::Request => None,
            FieldSource::Headers => Some(request.headers()),
            FieldSource::QueryParams => Some(request.query_params()),
            FieldSource::BodyParams => Some(request.body_params()),
        }
    }
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One `(source, family)` entry of the transformer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransformerSpec {
    pub source: FieldSource,
    pub family: Family,
}

impl TransformerSpec {
    pub const fn new(source: FieldSource, family: Family) -> Self {
        Self { source, family }
    }

    /// `{char-distribution, entropy, length} x {query params, body params}`
    pub fn default_table() -> Vec<TransformerSpec> {
        let mut table = Vec::with_capacity(6);
        for family in [Family::CharDistribution, Family::Entropy, Family::Length] {
            for source in [FieldSource::QueryParams, FieldSource::BodyParams] {
                table.push(TransformerSpec::new(source, family));
            }
        }
        table
    }

    /// Column order key: family first, then source
    pub(crate) fn order_key(&self) -> (Family, FieldSource) {
        (self.family, self.source)
    }
}

impl fmt::Display for TransformerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.family)
    }
}

impl FromStr for TransformerSpec {
    type Err = WafError;

    /// Parses the `Qp:Entropy` form
    fn from_str(s: &str) -> Result<Self> {
        let (source, family) = s
            .split_once(':')
            .ok_or_else(|| WafError::Config(format!("invalid transformer '{s}'")))?;
        let source = match source.trim() {
            "Rq" => FieldSource::Request,
            "He" => FieldSource::Headers,
            "Qp" => FieldSource::QueryParams,
            "Bp" => FieldSource::BodyParams,
            other => return Err(WafError::Config(format!("unknown field source '{other}'"))),
        };
        let family = match family.trim() {
            "CharDis" => Family::CharDistribution,
            "Entropy" => Family::Entropy,
            "Length" => Family::Length,
            "RawData" => Family::Raw,
            other => return Err(WafError::Config(format!("unknown feature family '{other}'"))),
        };
        Ok(Self::new(source, family))
    }
}

/// Column name: (family, sub-part, source, key)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureName {
    pub family: Family,
    pub sub_part: &'static str,
    pub source: FieldSource,
    /// Empty for whole-request features
    pub key: String,
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.family, self.sub_part, self.source)?;
        if !self.key.is_empty() {
            write!(f, "/{}", self.key)?;
        }
        Ok(())
    }
}
