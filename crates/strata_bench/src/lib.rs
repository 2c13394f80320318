//! Benchmark utilities.

use rand::Rng;
use strata_codec::{LogicalType, Value};
use strata_core::{
    ColumnDef, ColumnVector, Config, ConflictType, DataBlock, Storage, TableDef, DEFAULT_DATABASE,
};

/// Benchmark table: `id BigInt`, `score Double`, `name Varchar`.
pub fn bench_table(name: &str) -> TableDef {
    TableDef::new(
        name,
        vec![
            ColumnDef::new(0, "id", LogicalType::BigInt),
            ColumnDef::new(1, "score", LogicalType::Double),
            ColumnDef::new(2, "name", LogicalType::Varchar),
        ],
    )
}

/// Random rows for [`bench_table`].
pub fn random_block(rows: usize) -> DataBlock {
    let mut rng = rand::thread_rng();
    let ids = (0..rows).map(|_| Value::BigInt(rng.gen())).collect();
    let scores = (0..rows).map(|_| Value::Double(rng.gen())).collect();
    let names = (0..rows)
        .map(|_| Value::Varchar(format!("name-{}", rng.gen_range(0..1_000_000))))
        .collect();
    DataBlock::from_columns(vec![
        ColumnVector::with_values(LogicalType::BigInt, ids).unwrap(),
        ColumnVector::with_values(LogicalType::Double, scores).unwrap(),
        ColumnVector::with_values(LogicalType::Varchar, names).unwrap(),
    ])
    .unwrap()
}

/// In-memory storage with an empty `t1` in the default database.
pub fn storage_with_table(config: Config) -> Storage {
    let storage = Storage::open_with_provider(
        std::sync::Arc::new(strata_storage::MemoryProvider::new()),
        config,
    )
    .unwrap();
    let txn = storage.begin_txn().unwrap();
    txn.create_table(DEFAULT_DATABASE, bench_table("t1"), ConflictType::Error)
        .unwrap();
    storage.commit(&txn).unwrap();
    storage
}

/// Imports `segments` sealed segments of `rows` rows each into `t1`.
pub fn import_segments(storage: &Storage, segments: usize, rows: usize) {
    for _ in 0..segments {
        let txn = storage.begin_txn().unwrap();
        txn.import_segment(DEFAULT_DATABASE, "t1", vec![random_block(rows)])
            .unwrap();
        storage.commit(&txn).unwrap();
    }
}
