//! End-to-end import tests over the in-memory backend
//!
//! These drive the full pipeline: a shaped source array, fragmentation,
//! multi-worker batched inserts, and the catalog records a downstream
//! operator would re-read.

use cubefrag::{
    import_datacube, ArraySource, CompressionMethod, DatacubeImporter, DatacubeMetadata,
    DimensionDescriptor, ElementType, FragmentIdSet, FragmentPlacement, ImportConfig, ImportMode,
    IoServer, MemoryArraySource, MemoryIoServer, MemoryStore,
};
use ndarray::Array;
use std::fs;
use std::sync::Arc;

fn dimension(
    name: &str,
    size: u64,
    explicit: bool,
    level: u16,
    window: (u64, u64),
) -> DimensionDescriptor {
    DimensionDescriptor::new(
        name,
        ElementType::Double,
        size,
        explicit,
        level,
        window.0,
        window.1,
    )
    .unwrap()
}

/// lat(6) x lon(8) x time(5), value = lat*40 + lon*5 + time
fn climate_dimensions() -> Vec<DimensionDescriptor> {
    vec![
        dimension("lat", 6, true, 1, (0, 5)),
        dimension("lon", 8, true, 2, (0, 7)),
        dimension("time", 5, false, 1, (0, 4)),
    ]
}

fn climate_source() -> Arc<dyn ArraySource> {
    let data = Array::from_iter((0..240).map(f64::from))
        .into_shape_with_order(vec![6, 8, 5])
        .unwrap();
    Arc::new(MemoryArraySource::new(data, climate_dimensions()).unwrap())
}

fn worker_pool(store: &MemoryStore, workers: usize) -> Vec<Box<dyn IoServer>> {
    (0..workers)
        .map(|_| Box::new(MemoryIoServer::with_store(store.clone())) as Box<dyn IoServer>)
        .collect()
}

#[tokio::test]
async fn test_full_import_reconstructs_the_source() {
    let source = climate_source();
    let importer = Arc::new(
        DatacubeImporter::new(
            source,
            "tos",
            8,
            ImportConfig::default(),
            ImportMode::Full,
        )
        .unwrap(),
    );
    assert_eq!(importer.fragment_count(), 6);

    let store = MemoryStore::new();
    let fragments = FragmentIdSet::from_bounds(1, importer.fragment_count()).unwrap();
    let placement = FragmentPlacement::new("dbms1", "ophdb");
    let imported = import_datacube(
        Arc::clone(&importer),
        &fragments,
        placement,
        worker_pool(&store, 3),
    )
    .await
    .unwrap();
    assert_eq!(imported.len(), 6);

    // Every tuple of the source must come back, keyed globally and packed
    // in canonical time order.
    for fragment in &imported {
        let table = format!("fact_tos_{}", fragment.relative_index);
        let rows = store.rows("ophdb", &table);
        assert_eq!(rows.len() as u64, fragment.rows);
        for (offset, (key, blob)) in rows.iter().enumerate() {
            assert_eq!(*key as u64, fragment.key_start + offset as u64);
            let tuple = *key as u64 - 1;
            let (lat, lon) = (tuple / 8, tuple % 8);
            let expected: Vec<f64> =
                (0..5).map(|t| (lat * 40 + lon * 5 + t) as f64).collect();
            let values: Vec<f64> = blob
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                .collect();
            assert_eq!(values, expected);
        }
    }
}

#[tokio::test]
async fn test_catalog_record_round_trips_through_disk() {
    let source = climate_source();
    let importer = Arc::new(
        DatacubeImporter::new(
            source,
            "tos",
            16,
            ImportConfig::default().with_compression(CompressionMethod::Zstd),
            ImportMode::Full,
        )
        .unwrap(),
    );

    let store = MemoryStore::new();
    let fragments = FragmentIdSet::from_bounds(1, importer.fragment_count()).unwrap();
    let imported = import_datacube(
        Arc::clone(&importer),
        &fragments,
        FragmentPlacement::new("dbms1", "ophdb"),
        worker_pool(&store, 2),
    )
    .await
    .unwrap();

    let metadata = DatacubeMetadata::new("tos", ElementType::Double, climate_dimensions(), 16)
        .unwrap()
        .with_compression(CompressionMethod::Zstd);
    assert_eq!(
        metadata.fragment_count().unwrap() as u64,
        importer.fragment_count()
    );

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("metadata.json");
    fs::write(&path, metadata.to_json().unwrap()).unwrap();

    let reread = DatacubeMetadata::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(reread.id, metadata.id);
    assert_eq!(reread.fragment_set.as_str(), "1-3");
    assert_eq!(reread.compression, CompressionMethod::Zstd);
    assert!(imported.iter().all(|f| f.compressed));

    // A downstream operator drops fragment 2 and persists the survivors.
    let mut survivors = reread.fragment_set.clone();
    survivors.remove(2).unwrap();
    assert_eq!(survivors.as_str(), "1;3");
    assert_eq!(survivors.count().unwrap(), 2);
}

#[tokio::test]
async fn test_subrange_assignment_through_fragment_sets() {
    let source = climate_source();
    let importer = Arc::new(
        DatacubeImporter::new(source, "tos", 8, ImportConfig::default(), ImportMode::Full)
            .unwrap(),
    );
    let all = FragmentIdSet::from_bounds(1, importer.fragment_count()).unwrap();

    // Two distributed processes each take a contiguous logical subrange.
    let first = all.extract(0, 4).unwrap();
    let second = all.extract(4, 2).unwrap();
    assert_eq!(first.as_str(), "1-4");
    assert_eq!(second.as_str(), "5-6");

    let store = MemoryStore::new();
    for share in [first, second] {
        import_datacube(
            Arc::clone(&importer),
            &share,
            FragmentPlacement::new("dbms1", "ophdb"),
            worker_pool(&store, 2),
        )
        .await
        .unwrap();
    }
    assert_eq!(store.tables("ophdb").len(), 6);
}
