//! Batched import of a source array subset into datacube fragments
//!
//! One importer is built per datacube import plan. For each fragment it
//! selects between a single bulk read with block transposition and a slower
//! row-at-a-time read, sizes insert batches against the per-statement
//! ceilings, and drives the multi-insert protocol of [`crate::server`].
//! Nothing here retries: the first failure aborts the fragment and
//! propagates, and cleanup of already-written fragments belongs to the
//! caller.

use crate::compression::{get_compressor, CompressionLevel, CompressionMethod};
use crate::error::{CubeError, Result};
use crate::mapper::tuple_to_coordinate;
use crate::metadata::{FragmentMetadata, FragmentPlacement};
use crate::server::{IoServer, QueryArg, QueryHandle};
use crate::source::{ArraySource, Element};
use crate::transpose::{reorder, source_strides};
use crate::types::{explicit_order, implicit_order, validate_levels, DimensionDescriptor, ElementType};
use crate::utils::{bytes_to_typed_data, format_bytes, fragment_table, typed_data_to_bytes};
use bytes::Bytes;
use futures::future::try_join_all;
use num_traits::{FromPrimitive, ToPrimitive};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-statement row ceiling
pub const DEFAULT_BATCH_ROWS: usize = 1000;

/// Default per-statement byte ceiling
pub const DEFAULT_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Default memory budget for strategy selection
pub const DEFAULT_MEMORY_BUDGET: u64 = 256 * 1024 * 1024;

/// Tunable knobs for one import plan
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Byte ceiling steering bulk-versus-row strategy selection
    pub memory_budget: u64,
    /// Maximum rows bound into one insert statement
    pub batch_rows: usize,
    /// Maximum bytes bound into one insert statement
    pub batch_bytes: usize,
    /// Measure blob wrapping applied before insertion
    pub compression: CompressionMethod,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            memory_budget: DEFAULT_MEMORY_BUDGET,
            batch_rows: DEFAULT_BATCH_ROWS,
            batch_bytes: DEFAULT_BATCH_BYTES,
            compression: CompressionMethod::None,
        }
    }
}

impl ImportConfig {
    /// Set the memory budget
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Set the per-statement row ceiling
    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows;
        self
    }

    /// Set the per-statement byte ceiling
    pub fn with_batch_bytes(mut self, bytes: usize) -> Self {
        self.batch_bytes = bytes;
        self
    }

    /// Set the measure blob compression
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }
}

/// Reducer applied to one row's implicit block, yielding one output element
pub type Reducer = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// What each row's measure blob holds
#[derive(Clone)]
pub enum ImportMode {
    /// The full implicit-dimension array in canonical order
    Full,
    /// One aggregate element per explicit coordinate
    Reduce {
        reducer: Reducer,
        /// Byte width of one reduced output element
        output_size: usize,
    },
}

/// Arithmetic-mean reducer preserving the input element type
pub fn mean_reducer(element_type: ElementType) -> Reducer {
    Arc::new(move |block: &[u8]| match element_type {
        ElementType::Byte => mean_of::<i8>(block),
        ElementType::Short => mean_of::<i16>(block),
        ElementType::Int => mean_of::<i32>(block),
        ElementType::Long => mean_of::<i64>(block),
        ElementType::Float => mean_of::<f32>(block),
        ElementType::Double => mean_of::<f64>(block),
    })
}

fn mean_of<T>(block: &[u8]) -> Result<Vec<u8>>
where
    T: Element + ToPrimitive + FromPrimitive,
{
    let values: Vec<T> = bytes_to_typed_data(block)?;
    if values.is_empty() {
        return Err(CubeError::ShapeMismatch {
            expected: 1,
            actual: 0,
        });
    }
    let sum: f64 = values.iter().filter_map(|v| v.to_f64()).sum();
    let mean = sum / values.len() as f64;
    let out = T::from_f64(mean)
        .ok_or_else(|| CubeError::OutOfRange(format!("mean {} not representable", mean)))?;
    Ok(typed_data_to_bytes(&[out]))
}

/// Strategy chosen for one fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStrategy {
    /// Single bulk read, block transposition, batched inserts from the cache
    Bulk,
    /// One source read per destination row
    Row,
}

/// Importer for one datacube plan over one open source array
pub struct DatacubeImporter {
    source: Arc<dyn ArraySource>,
    datacube_id: Uuid,
    datacube_name: String,
    config: ImportConfig,
    mode: ImportMode,

    dims: Vec<DimensionDescriptor>,
    /// Canonical explicit order, as source axis indices
    explicit_src: Vec<usize>,
    /// Explicit subset extents, outermost first
    explicit_extents: Vec<u64>,
    /// Implicit subset extents, outermost first
    implicit_extents: Vec<u64>,
    /// Element strides of canonical implicit axes in the source block
    implicit_strides: Vec<u64>,
    implicit_needs_reorder: bool,
    /// Explicit dims precede implicit dims and match canonical relative order
    layout_allows_bulk: bool,
    /// Product of the non-outermost explicit extents
    inner_slab: u64,

    tuples_total: u64,
    tuples_per_fragment: u64,
    array_len: u64,
    element_size: usize,
    row_blob_size: usize,
}

impl DatacubeImporter {
    /// Build an importer, deriving the canonical layout from the source
    pub fn new(
        source: Arc<dyn ArraySource>,
        datacube_name: impl Into<String>,
        tuples_per_fragment: u64,
        config: ImportConfig,
        mode: ImportMode,
    ) -> Result<Self> {
        let dims = source.dimensions().to_vec();
        validate_levels(&dims)?;
        if tuples_per_fragment == 0 {
            return Err(CubeError::Configuration(
                "tuples per fragment must be positive".to_string(),
            ));
        }
        if let ImportMode::Reduce { output_size, .. } = &mode {
            if *output_size == 0 {
                return Err(CubeError::Configuration(
                    "reducer output size must be positive".to_string(),
                ));
            }
        }

        let explicit_src = explicit_order(&dims);
        let implicit_src = implicit_order(&dims);
        let explicit_extents: Vec<u64> =
            explicit_src.iter().map(|&i| dims[i].subset_extent()).collect();
        let implicit_extents: Vec<u64> =
            implicit_src.iter().map(|&i| dims[i].subset_extent()).collect();
        let tuples_total: u64 = explicit_extents.iter().product();
        let array_len: u64 = implicit_extents.iter().product();
        let element_size = source.element_type().size_in_bytes();

        // The j-th implicit axis of the source block, by ascending source
        // index, holds this canonical axis.
        let mut implicit_source_order: Vec<usize> = (0..implicit_src.len()).collect();
        implicit_source_order.sort_by_key(|&i| implicit_src[i]);
        let implicit_strides = source_strides(&implicit_extents, &implicit_source_order)?;
        let implicit_needs_reorder = implicit_src.windows(2).any(|w| w[0] > w[1]);

        let explicit_in_source_order = explicit_src.windows(2).all(|w| w[0] < w[1]);
        let explicit_before_implicit = match implicit_src.iter().min() {
            Some(min_implicit) => explicit_src.iter().all(|i| i < min_implicit),
            None => true,
        };
        let layout_allows_bulk = explicit_in_source_order && explicit_before_implicit;

        let inner_slab = if explicit_extents.len() > 1 {
            explicit_extents[1..].iter().product()
        } else {
            1
        };

        let row_blob_size = match &mode {
            ImportMode::Full => array_len as usize * element_size,
            ImportMode::Reduce { output_size, .. } => *output_size,
        };

        Ok(Self {
            source,
            datacube_id: Uuid::new_v4(),
            datacube_name: datacube_name.into(),
            config,
            mode,
            dims,
            explicit_src,
            explicit_extents,
            implicit_extents,
            implicit_strides,
            implicit_needs_reorder,
            layout_allows_bulk,
            inner_slab,
            tuples_total,
            tuples_per_fragment,
            array_len,
            element_size,
            row_blob_size,
        })
    }

    /// Datacube identity minted for this plan
    pub fn datacube_id(&self) -> Uuid {
        self.datacube_id
    }

    /// Total rows across the whole datacube
    pub fn total_tuples(&self) -> u64 {
        self.tuples_total
    }

    /// Number of fragments the plan produces
    pub fn fragment_count(&self) -> u64 {
        self.tuples_total.div_ceil(self.tuples_per_fragment)
    }

    /// Inclusive row-key range owned by one fragment
    pub fn key_range(&self, relative_index: u64) -> Result<(u64, u64)> {
        if relative_index == 0 || relative_index > self.fragment_count() {
            return Err(CubeError::OutOfRange(format!(
                "fragment {} outside plan of {} fragments",
                relative_index,
                self.fragment_count()
            )));
        }
        let first = (relative_index - 1) * self.tuples_per_fragment + 1;
        let last = (relative_index * self.tuples_per_fragment).min(self.tuples_total);
        Ok((first, last))
    }

    /// Strategy the importer will use for one fragment
    pub fn strategy_for(&self, relative_index: u64) -> Result<ImportStrategy> {
        self.key_range(relative_index)?;
        if !matches!(self.mode, ImportMode::Full) {
            return Ok(ImportStrategy::Row);
        }
        let fragment_bytes = self.tuples_per_fragment * self.row_blob_size as u64;
        if fragment_bytes > self.config.memory_budget / 2 {
            debug!(
                fragment = relative_index,
                size = %format_bytes(fragment_bytes as usize),
                budget = %format_bytes(self.config.memory_budget as usize),
                "fragment exceeds half the memory budget, using row strategy"
            );
            return Ok(ImportStrategy::Row);
        }
        if !self.layout_allows_bulk {
            warn!(
                fragment = relative_index,
                "source dimension order prevents a single bulk read, using row strategy"
            );
            return Ok(ImportStrategy::Row);
        }
        if self.tuples_per_fragment % self.inner_slab != 0 {
            debug!(
                fragment = relative_index,
                "fragment boundary does not align with outer-dimension slabs, using row strategy"
            );
            return Ok(ImportStrategy::Row);
        }
        Ok(ImportStrategy::Bulk)
    }

    /// Rows bound into one statement, honoring both batch ceilings
    fn rows_per_batch(&self) -> usize {
        let row_total = self.row_blob_size + std::mem::size_of::<u64>();
        let by_bytes = (self.config.batch_bytes / row_total).max(1);
        self.config.batch_rows.min(by_bytes).max(1)
    }

    /// Import one fragment through one owned connection
    ///
    /// The fragment's metadata is returned only after every batch succeeded.
    pub async fn import_fragment(
        &self,
        relative_index: u64,
        server: &mut dyn IoServer,
        placement: &FragmentPlacement,
    ) -> Result<FragmentMetadata> {
        let (key_start, key_end) = self.key_range(relative_index)?;
        let strategy = self.strategy_for(relative_index)?;
        server.select_database(&placement.database).await?;

        debug!(
            datacube = %self.datacube_id,
            fragment = relative_index,
            ?strategy,
            rows = key_end - key_start + 1,
            "importing fragment"
        );
        match strategy {
            ImportStrategy::Row => {
                self.import_rowwise(relative_index, key_start, key_end, server)
                    .await?
            }
            ImportStrategy::Bulk => {
                self.import_bulk(relative_index, key_start, key_end, server)
                    .await?
            }
        }

        Ok(FragmentMetadata {
            datacube_id: self.datacube_id,
            relative_index,
            key_start,
            key_end,
            placement: placement.clone(),
            rows: key_end - key_start + 1,
            compressed: self.config.compression.wraps_blobs(),
        })
    }

    /// Wrap one row's measure bytes into its insert argument
    fn blob_arg(&self, row: &[u8]) -> Result<QueryArg> {
        if self.config.compression.wraps_blobs() {
            let compressor = get_compressor(self.config.compression);
            let wrapped = compressor.compress(row, CompressionLevel::default())?;
            Ok(QueryArg::VarBlob(Bytes::from(wrapped)))
        } else {
            Ok(QueryArg::FixedBlob(Bytes::copy_from_slice(row)))
        }
    }

    async fn import_rowwise(
        &self,
        relative_index: u64,
        key_start: u64,
        key_end: u64,
        server: &mut dyn IoServer,
    ) -> Result<()> {
        let rows = (key_end - key_start + 1) as usize;
        let table = fragment_table(&self.datacube_name, relative_index);
        let mut writer =
            BatchWriter::begin(server, table, rows, self.rows_per_batch()).await?;

        let mut origin = vec![0u64; self.dims.len()];
        let mut shape = vec![0u64; self.dims.len()];
        for (axis, dim) in self.dims.iter().enumerate() {
            if dim.explicit {
                shape[axis] = 1;
            } else {
                origin[axis] = dim.start_index;
                shape[axis] = dim.subset_extent();
            }
        }

        let mut block = Vec::new();
        for key in key_start..=key_end {
            let coordinate = tuple_to_coordinate(key, &self.explicit_extents)?;
            for (canonical, &axis) in self.explicit_src.iter().enumerate() {
                origin[axis] = self.dims[axis].start_index + coordinate[canonical] - 1;
            }
            self.source.read_block(&origin, &shape, &mut block)?;

            let expected = self.array_len as usize * self.element_size;
            if block.len() != expected {
                return Err(CubeError::ShapeMismatch {
                    expected: self.array_len as usize,
                    actual: block.len() / self.element_size,
                });
            }

            let arg = match &self.mode {
                ImportMode::Full => {
                    if self.implicit_needs_reorder {
                        let transposed = reorder(
                            &block,
                            &self.implicit_extents,
                            &self.implicit_strides,
                            self.element_size,
                        )?;
                        self.blob_arg(&transposed)?
                    } else {
                        self.blob_arg(&block)?
                    }
                }
                ImportMode::Reduce { reducer, output_size } => {
                    let reduced = reducer(&block)?;
                    if reduced.len() != *output_size {
                        return Err(CubeError::ShapeMismatch {
                            expected: *output_size,
                            actual: reduced.len(),
                        });
                    }
                    self.blob_arg(&reduced)?
                }
            };
            writer.push(key, arg).await?;
        }
        writer.finish().await
    }

    async fn import_bulk(
        &self,
        relative_index: u64,
        key_start: u64,
        key_end: u64,
        server: &mut dyn IoServer,
    ) -> Result<()> {
        let rows = (key_end - key_start + 1) as usize;
        let table = fragment_table(&self.datacube_name, relative_index);

        // One read covering the fragment's slab of the outermost explicit
        // dimension plus the full windows of everything inner.
        let mut origin = vec![0u64; self.dims.len()];
        let mut shape = vec![0u64; self.dims.len()];
        for (axis, dim) in self.dims.iter().enumerate() {
            origin[axis] = dim.start_index;
            shape[axis] = dim.subset_extent();
        }
        if let Some(&outer_axis) = self.explicit_src.first() {
            let outer_first = (key_start - 1) / self.inner_slab;
            let outer_count = rows as u64 / self.inner_slab;
            origin[outer_axis] = self.dims[outer_axis].start_index + outer_first;
            shape[outer_axis] = outer_count;
        }

        let expected = rows * self.array_len as usize * self.element_size;
        let mut cache = Vec::new();
        cache.try_reserve_exact(expected)?;
        self.source.read_block(&origin, &shape, &mut cache)?;
        if cache.len() != expected {
            return Err(CubeError::ShapeMismatch {
                expected: rows * self.array_len as usize,
                actual: cache.len() / self.element_size,
            });
        }

        let rows_per_batch = self.rows_per_batch();
        let mut writer = BatchWriter::begin(server, table, rows, rows_per_batch).await?;

        // Combined odometer: the row axis plus the implicit axes, reordered
        // once per insert-batch slice straight out of the cache.
        let row_bytes = self.array_len as usize * self.element_size;
        let mut batch_start = 0usize;
        while batch_start < rows {
            let batch_rows = rows_per_batch.min(rows - batch_start);
            let slice = &cache[batch_start * row_bytes..(batch_start + batch_rows) * row_bytes];
            let insert_ready: Vec<u8>;
            let batch_view: &[u8] = if self.implicit_needs_reorder {
                let mut limits = Vec::with_capacity(self.implicit_extents.len() + 1);
                limits.push(batch_rows as u64);
                limits.extend_from_slice(&self.implicit_extents);
                let mut strides = Vec::with_capacity(self.implicit_strides.len() + 1);
                strides.push(self.array_len);
                strides.extend_from_slice(&self.implicit_strides);
                insert_ready = reorder(slice, &limits, &strides, self.element_size)?;
                &insert_ready
            } else {
                slice
            };

            for (row_idx, row) in batch_view.chunks_exact(row_bytes).enumerate() {
                let key = key_start + (batch_start + row_idx) as u64;
                let arg = self.blob_arg(row)?;
                writer.push(key, arg).await?;
            }
            batch_start += batch_rows;
        }
        writer.finish().await
    }
}

/// Accumulates `(key, blob)` pairs and flushes them through the prepared
/// multi-insert protocol: one statement compiled for the full batches, a
/// second shorter one for the remainder
struct BatchWriter<'s> {
    server: &'s mut dyn IoServer,
    table: String,
    rows_per_batch: usize,
    full_batches: usize,
    executed: usize,
    main: Option<QueryHandle>,
    args: Vec<QueryArg>,
}

impl<'s> BatchWriter<'s> {
    async fn begin(
        server: &'s mut dyn IoServer,
        table: String,
        total_rows: usize,
        rows_per_batch: usize,
    ) -> Result<BatchWriter<'s>> {
        let full_batches = total_rows / rows_per_batch;
        let main = if full_batches > 0 {
            let statement = multi_insert_statement(&table, rows_per_batch);
            Some(
                server
                    .prepare(&statement, full_batches, 2 * rows_per_batch)
                    .await?,
            )
        } else {
            None
        };
        Ok(BatchWriter {
            server,
            table,
            rows_per_batch,
            full_batches,
            executed: 0,
            main,
            args: Vec::with_capacity(2 * rows_per_batch),
        })
    }

    async fn push(&mut self, key: u64, blob: QueryArg) -> Result<()> {
        self.args.push(QueryArg::Int64(key as i64));
        self.args.push(blob);
        if self.args.len() == 2 * self.rows_per_batch && self.executed < self.full_batches {
            let handle = self
                .main
                .ok_or_else(|| CubeError::Backend("batch writer lost its statement".to_string()))?;
            self.server.execute(handle, &self.args).await?;
            self.executed += 1;
            self.args.clear();
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        if !self.args.is_empty() {
            let remainder_rows = self.args.len() / 2;
            let statement = multi_insert_statement(&self.table, remainder_rows);
            let handle = self.server.prepare(&statement, 1, self.args.len()).await?;
            self.server.execute(handle, &self.args).await?;
            self.server.release(handle).await?;
            self.args.clear();
        }
        if let Some(handle) = self.main.take() {
            self.server.release(handle).await?;
        }
        Ok(())
    }
}

/// One parameterized multi-insert with `2 * rows` positional arguments
fn multi_insert_statement(table: &str, rows: usize) -> String {
    let mut values = String::with_capacity(rows * 6);
    for i in 0..rows {
        if i > 0 {
            values.push(',');
        }
        values.push_str("(?,?)");
    }
    format!("INSERT INTO {} (id_dim, measure) VALUES {}", table, values)
}

/// Contiguous even split of `total` items over `parts` workers
///
/// Returns `(start, len)` per part; the remainder goes to the
/// lowest-indexed parts.
pub fn split_evenly(total: usize, parts: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(parts);
    let base = total / parts.max(1);
    let remainder = total % parts.max(1);
    let mut start = 0;
    for part in 0..parts {
        let len = base + usize::from(part < remainder);
        ranges.push((start, len));
        start += len;
    }
    ranges
}

/// Import a set of fragments over a pool of worker connections
///
/// Each worker owns one connection, opens it, imports its contiguous share
/// of the fragment set sequentially and closes it. The first failure aborts
/// the join; cleanup of fragments written so far is the caller's decision.
pub async fn import_datacube(
    importer: Arc<DatacubeImporter>,
    fragments: &crate::fragset::FragmentIdSet,
    placement: FragmentPlacement,
    servers: Vec<Box<dyn IoServer>>,
) -> Result<Vec<FragmentMetadata>> {
    if servers.is_empty() {
        return Err(CubeError::Configuration(
            "at least one worker connection is required".to_string(),
        ));
    }
    let ids = fragments.ids()?;
    let shares = split_evenly(ids.len(), servers.len());

    let mut workers = Vec::with_capacity(servers.len());
    for (mut server, (start, len)) in servers.into_iter().zip(shares) {
        let importer = Arc::clone(&importer);
        let placement = placement.clone();
        let share: Vec<u64> = ids[start..start + len].to_vec();
        workers.push(tokio::spawn(async move {
            let mut imported = Vec::with_capacity(share.len());
            if share.is_empty() {
                return Ok(imported);
            }
            server.open().await?;
            for relative_index in share {
                imported.push(
                    importer
                        .import_fragment(relative_index, server.as_mut(), &placement)
                        .await?,
                );
            }
            server.close().await?;
            Ok::<_, CubeError>(imported)
        }));
    }

    let joined = try_join_all(workers)
        .await
        .map_err(|e| CubeError::Backend(format!("worker task failed: {}", e)))?;
    let mut imported = Vec::new();
    for share in joined {
        imported.extend(share?);
    }
    debug!(
        datacube = %importer.datacube_id(),
        fragments = imported.len(),
        "datacube import complete"
    );
    Ok(imported)
}
