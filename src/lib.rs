//! Cubefrag - datacube fragmentation and import engine
//!
//! Stores N-dimensional scientific array data (climate, astronomy, seismic
//! datasets) as horizontally sharded collections of fixed-width binary rows
//! inside a relational backing store, and reconstructs, subsets and exports
//! them later.
//!
//! # Features
//!
//! - Compact range-based textual sets of fragment relative indices
//! - Exact 1-based mixed-radix mapping between flat tuple ids and
//!   per-dimension coordinates, honoring the explicit/implicit split and
//!   per-dimension concept levels
//! - Odometer-driven buffer transposition from a source's native axis order
//!   into canonical order
//! - A batched import engine that picks between a whole-fragment bulk read
//!   and row-at-a-time streaming under a caller-supplied memory budget
//! - A storage-backend-agnostic batch statement abstraction (implement the
//!   `IoServer` trait for your relational driver)
//!
//! # Example
//!
//! ```rust,ignore
//! use cubefrag::{DatacubeImporter, ImportConfig, ImportMode, MemoryIoServer};
//!
//! # async fn example(source: std::sync::Arc<dyn cubefrag::ArraySource>) -> cubefrag::Result<()> {
//! let importer = DatacubeImporter::new(
//!     source,
//!     "tos",
//!     1800,
//!     ImportConfig::default(),
//!     ImportMode::Full,
//! )?;
//! let mut server = MemoryIoServer::new();
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod error;
pub mod fragset;
pub mod import;
pub mod mapper;
pub mod metadata;
pub mod server;
pub mod source;
pub mod transpose;
pub mod types;
pub mod utils;

// Re-exports
pub use compression::{CompressionMethod, Compressor};
pub use error::{CubeError, Result};
pub use fragset::FragmentIdSet;
pub use import::{
    import_datacube, DatacubeImporter, ImportConfig, ImportMode, ImportStrategy,
};
pub use metadata::{DatacubeMetadata, FragmentMetadata, FragmentPlacement};
pub use server::{IoServer, MemoryIoServer, MemoryStore, QueryArg, ServerBackend};
pub use source::{ArraySource, MemoryArraySource};
pub use types::{DimensionDescriptor, ElementType};

/// Version of the cubefrag implementation
pub const CUBEFRAG_VERSION: &str = env!("CARGO_PKG_VERSION");
