//! Index definitions.
//!
//! The catalog records which indexes exist and what they cover. Building and
//! querying the index structures is left to index builders reading the
//! catalog.

use super::entry::{BaseEntry, CatalogEntry, EntryType};
use super::table::ColumnDef;
use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strata_codec::LogicalType;

/// A `name = value` index option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitParameter {
    /// Option name, matched case-insensitively.
    pub name: String,
    /// Option value.
    pub value: String,
}

impl InitParameter {
    /// Creates a parameter.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Distance metric for vector indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    /// Euclidean distance.
    L2,
    /// Inner product.
    InnerProduct,
    /// Cosine similarity.
    Cosine,
}

impl FromStr for MetricType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(Self::L2),
            "ip" | "inner_product" => Ok(Self::InnerProduct),
            "cos" | "cosine" => Ok(Self::Cosine),
            other => Err(CoreError::invalid_index(format!("unknown metric: {other}"))),
        }
    }
}

/// Vector storage encoding for HNSW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HnswEncode {
    /// Raw `f32` vectors.
    Plain,
    /// Locally-adaptive vector quantization.
    Lvq,
}

impl FromStr for HnswEncode {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "lvq" => Ok(Self::Lvq),
            other => Err(CoreError::invalid_index(format!("unknown encode: {other}"))),
        }
    }
}

/// Index algorithm and its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Inverted-file flat vector index.
    IvfFlat {
        /// Number of centroids.
        centroids_count: u32,
        /// Distance metric.
        metric: MetricType,
    },
    /// HNSW graph vector index.
    Hnsw {
        /// Distance metric.
        metric: MetricType,
        /// Vector encoding.
        encode: HnswEncode,
        /// Max neighbors per node.
        m: u32,
        /// Candidate list size while building.
        ef_construction: u32,
        /// Candidate list size while searching.
        ef: u32,
    },
    /// Full-text inverted index.
    FullText {
        /// Analyzer name.
        analyzer: String,
    },
    /// Secondary (ordered) index on scalar columns.
    Secondary,
}

impl IndexKind {
    /// Short algorithm name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::IvfFlat { .. } => "IVFFlat",
            Self::Hnsw { .. } => "HNSW",
            Self::FullText { .. } => "FullText",
            Self::Secondary => "Secondary",
        }
    }
}

fn parse_number(param: &InitParameter) -> CoreResult<u32> {
    param.value.parse().map_err(|_| {
        CoreError::invalid_index(format!("{} must be a positive integer, got {:?}", param.name, param.value))
    })
}

/// One index over a list of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBase {
    /// File name index builders store the index under.
    pub file_name: String,
    /// Indexed columns.
    pub column_names: Vec<String>,
    /// Algorithm and options.
    pub kind: IndexKind,
}

impl IndexBase {
    /// IVF-flat index; options `centroids_count` (default 128) and `metric`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndexDefinition` for an unknown or malformed option or
    /// a missing metric.
    pub fn ivf_flat(
        file_name: impl Into<String>,
        column_names: Vec<String>,
        params: &[InitParameter],
    ) -> CoreResult<Self> {
        let mut centroids_count = 128;
        let mut metric = None;
        for param in params {
            match param.name.to_ascii_lowercase().as_str() {
                "centroids_count" => centroids_count = parse_number(param)?,
                "metric" => metric = Some(param.value.parse()?),
                other => {
                    return Err(CoreError::invalid_index(format!("unknown IVFFlat option: {other}")))
                }
            }
        }
        let metric = metric.ok_or_else(|| CoreError::invalid_index("IVFFlat requires a metric"))?;
        Ok(Self {
            file_name: file_name.into(),
            column_names,
            kind: IndexKind::IvfFlat {
                centroids_count,
                metric,
            },
        })
    }

    /// HNSW index; options `metric`, `encode` (plain), `M` (16),
    /// `ef_construction` (200), `ef` (200).
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndexDefinition` for an unknown or malformed option or
    /// a missing metric.
    pub fn hnsw(
        file_name: impl Into<String>,
        column_names: Vec<String>,
        params: &[InitParameter],
    ) -> CoreResult<Self> {
        let mut metric = None;
        let mut encode = HnswEncode::Plain;
        let (mut m, mut ef_construction, mut ef) = (16, 200, 200);
        for param in params {
            match param.name.to_ascii_lowercase().as_str() {
                "metric" => metric = Some(param.value.parse()?),
                "encode" => encode = param.value.parse()?,
                "m" => m = parse_number(param)?,
                "ef_construction" => ef_construction = parse_number(param)?,
                "ef" => ef = parse_number(param)?,
                other => {
                    return Err(CoreError::invalid_index(format!("unknown HNSW option: {other}")))
                }
            }
        }
        let metric = metric.ok_or_else(|| CoreError::invalid_index("HNSW requires a metric"))?;
        Ok(Self {
            file_name: file_name.into(),
            column_names,
            kind: IndexKind::Hnsw {
                metric,
                encode,
                m,
                ef_construction,
                ef,
            },
        })
    }

    /// Full-text index; option `analyzer` (default `standard`).
    #[must_use]
    pub fn full_text(
        file_name: impl Into<String>,
        column_names: Vec<String>,
        params: &[InitParameter],
    ) -> Self {
        let analyzer = params
            .iter()
            .rev()
            .find(|p| p.name.eq_ignore_ascii_case("analyzer"))
            .map_or_else(|| "standard".to_string(), |p| p.value.clone());
        Self {
            file_name: file_name.into(),
            column_names,
            kind: IndexKind::FullText { analyzer },
        }
    }

    /// Secondary index.
    #[must_use]
    pub fn secondary(file_name: impl Into<String>, column_names: Vec<String>) -> Self {
        Self {
            file_name: file_name.into(),
            column_names,
            kind: IndexKind::Secondary,
        }
    }

    /// Checks that the indexed columns exist and have a type the algorithm
    /// accepts.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` or `InvalidIndexDefinition`.
    pub fn validate(&self, columns: &[ColumnDef]) -> CoreResult<()> {
        if self.column_names.is_empty() {
            return Err(CoreError::invalid_index(format!("{} index needs a column", self.kind.name())));
        }
        let single_column = matches!(self.kind, IndexKind::IvfFlat { .. } | IndexKind::Hnsw { .. });
        if single_column && self.column_names.len() != 1 {
            return Err(CoreError::invalid_index(format!(
                "{} index takes exactly one column",
                self.kind.name()
            )));
        }

        for name in &self.column_names {
            let column = columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| CoreError::ColumnNotFound {
                    column: name.clone(),
                })?;
            let ty = column.logical_type;
            let accepted = match self.kind {
                IndexKind::IvfFlat { .. } | IndexKind::Hnsw { .. } => ty.is_embedding(),
                IndexKind::FullText { .. } => ty == LogicalType::Varchar,
                IndexKind::Secondary => !ty.is_embedding(),
            };
            if !accepted {
                return Err(CoreError::invalid_index(format!(
                    "{} index cannot be built on column {name} of type {ty}",
                    self.kind.name()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for IndexBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) -> {}", self.kind.name(), self.column_names.join(", "), self.file_name)
    }
}

/// A named index made of one or more index parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name, unique per table among live indexes.
    pub index_name: String,
    /// Index parts.
    pub index_array: Vec<IndexBase>,
}

impl IndexDef {
    /// Creates an index definition with no parts.
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            index_array: Vec::new(),
        }
    }

    /// Adds a part.
    #[must_use]
    pub fn with(mut self, index: IndexBase) -> Self {
        self.index_array.push(index);
        self
    }

    /// Validates every part against the table columns.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a bad name, `InvalidIndexDefinition`
    /// if there are no parts, or the first part error.
    pub fn validate(&self, columns: &[ColumnDef]) -> CoreResult<()> {
        super::validate_identifier("index", &self.index_name)?;
        if self.index_array.is_empty() {
            return Err(CoreError::invalid_index(format!(
                "index {} has no parts",
                self.index_name
            )));
        }
        self.index_array.iter().try_for_each(|index| index.validate(columns))
    }
}

/// A committed index version.
#[derive(Debug)]
pub struct TableIndexEntry {
    base: BaseEntry,
    index_def: IndexDef,
    covered_segments: Vec<SegmentId>,
}

impl TableIndexEntry {
    pub(crate) fn new(index_def: IndexDef, covered_segments: Vec<SegmentId>, commit_ts: Timestamp) -> Self {
        Self {
            base: BaseEntry::new(EntryType::TableIndex, commit_ts),
            index_def,
            covered_segments,
        }
    }

    /// The definition.
    #[must_use]
    pub fn index_def(&self) -> &IndexDef {
        &self.index_def
    }

    /// Index name.
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_def.index_name
    }

    /// Segments that existed when the index was prepared and must be built.
    #[must_use]
    pub fn covered_segments(&self) -> &[SegmentId] {
        &self.covered_segments
    }
}

impl CatalogEntry for TableIndexEntry {
    fn base(&self) -> &BaseEntry {
        &self.base
    }
}
