//! Datacube and fragment records handed to the external catalog
//!
//! The import engine produces these after a successful run; the catalog owns
//! their persistence and bookkeeping. Both JSON (catalog record) and compact
//! binary forms round-trip.

use crate::compression::CompressionMethod;
use crate::error::Result;
use crate::fragset::FragmentIdSet;
use crate::types::{total_tuples, validate_levels, DimensionDescriptor, ElementType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical location of one fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentPlacement {
    /// Backend server instance identifier
    pub dbms: String,
    /// Database name on that instance
    pub database: String,
}

impl FragmentPlacement {
    pub fn new(dbms: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            dbms: dbms.into(),
            database: database.into(),
        }
    }
}

/// Catalog record for one imported datacube
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacubeMetadata {
    /// Datacube identity
    pub id: Uuid,
    /// Measure variable name
    pub measure: String,
    /// Measure element type
    pub element_type: ElementType,
    /// Dimension descriptors in source order
    pub dimensions: Vec<DimensionDescriptor>,
    /// Relative indices of the fragments belonging to this datacube
    pub fragment_set: FragmentIdSet,
    /// Uniform row count per fragment (the last fragment may hold fewer)
    pub tuples_per_fragment: u64,
    /// Measure blob compression applied at import
    pub compression: CompressionMethod,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl DatacubeMetadata {
    /// Create a record for a fresh import plan
    pub fn new(
        measure: impl Into<String>,
        element_type: ElementType,
        dimensions: Vec<DimensionDescriptor>,
        tuples_per_fragment: u64,
    ) -> Result<Self> {
        validate_levels(&dimensions)?;
        let total = total_tuples(&dimensions);
        let fragment_count = total.div_ceil(tuples_per_fragment);
        Ok(Self {
            id: Uuid::new_v4(),
            measure: measure.into(),
            element_type,
            dimensions,
            fragment_set: FragmentIdSet::from_bounds(1, fragment_count)?,
            tuples_per_fragment,
            compression: CompressionMethod::None,
            created_at: Utc::now(),
        })
    }

    /// Set the measure blob compression
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Number of fragments in the plan
    pub fn fragment_count(&self) -> Result<usize> {
        self.fragment_set.count()
    }

    /// Serialize to the JSON catalog form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from the JSON catalog form
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the compact binary form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse from the compact binary form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Catalog record for one fully imported fragment
///
/// Produced only after every batch for the fragment succeeded; a failed
/// fragment yields an error instead, never a partial record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentMetadata {
    /// Owning datacube
    pub datacube_id: Uuid,
    /// 1-based relative index within the datacube's fragment collection
    pub relative_index: u64,
    /// First row key owned by this fragment
    pub key_start: u64,
    /// Last row key owned by this fragment
    pub key_end: u64,
    /// Physical location
    pub placement: FragmentPlacement,
    /// Rows actually inserted
    pub rows: u64,
    /// Whether measure blobs were compression-wrapped
    pub compressed: bool,
}

impl FragmentMetadata {
    /// Number of row keys in the fragment's range
    pub fn key_count(&self) -> u64 {
        self.key_end - self.key_start + 1
    }
}
