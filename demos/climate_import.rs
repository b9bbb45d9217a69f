//! Import a synthetic sea-surface-temperature cube and print the plan.
//!
//! Run with: cargo run --example climate_import

use anyhow::Result;
use cubefrag::{
    import_datacube, ArraySource, DatacubeImporter, DatacubeMetadata, DimensionDescriptor,
    ElementType, FragmentIdSet, FragmentPlacement, ImportConfig, ImportMode, IoServer,
    MemoryArraySource, MemoryIoServer, MemoryStore,
};
use ndarray::Array;
use std::sync::Arc;

fn dimensions() -> Vec<DimensionDescriptor> {
    vec![
        DimensionDescriptor::new("lat", ElementType::Float, 18, true, 1, 0, 17).unwrap(),
        DimensionDescriptor::new("lon", ElementType::Float, 36, true, 2, 0, 35).unwrap(),
        DimensionDescriptor::new("time", ElementType::Double, 12, false, 1, 0, 11).unwrap(),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Synthetic monthly SST anomalies on an 18x36 grid.
    let cells = 18 * 36 * 12;
    let data = Array::from_iter((0..cells).map(|i| (i % 97) as f64 / 10.0 - 4.8))
        .into_shape_with_order(vec![18, 36, 12])?;
    let source: Arc<dyn ArraySource> =
        Arc::new(MemoryArraySource::new(data, dimensions())?);

    let tuples_per_fragment = 72;
    let importer = Arc::new(DatacubeImporter::new(
        source,
        "sst_anomaly",
        tuples_per_fragment,
        ImportConfig::default(),
        ImportMode::Full,
    )?);

    let metadata = DatacubeMetadata::new(
        "sst_anomaly",
        ElementType::Double,
        dimensions(),
        tuples_per_fragment,
    )?;
    println!(
        "datacube {}: {} tuples over {} fragments ({})",
        metadata.id,
        importer.total_tuples(),
        importer.fragment_count(),
        metadata.fragment_set
    );

    let store = MemoryStore::new();
    let servers: Vec<Box<dyn IoServer>> = (0..4)
        .map(|_| Box::new(MemoryIoServer::with_store(store.clone())) as Box<dyn IoServer>)
        .collect();
    let fragments = FragmentIdSet::from_bounds(1, importer.fragment_count())?;
    let imported = import_datacube(
        importer,
        &fragments,
        FragmentPlacement::new("dbms1", "ophdb"),
        servers,
    )
    .await?;

    for fragment in &imported {
        println!(
            "fragment {:>2}: keys [{}, {}] on {}/{}",
            fragment.relative_index,
            fragment.key_start,
            fragment.key_end,
            fragment.placement.dbms,
            fragment.placement.database,
        );
    }
    println!("{} tables written", store.tables("ophdb").len());
    Ok(())
}
