use dolomite::collection::Collection;
use dolomite::config::EngineConfig;
use dolomite::errors::DolomiteResult;
use dolomite::{doc, Dolomite};

/// Opens a fresh engine with the oplog enabled, so tests can observe
/// emitted entries.
pub fn create_test_engine() -> Dolomite {
    Dolomite::open(EngineConfig::new().with_oplog_enabled(true))
        .expect("Failed to open test engine")
}

/// Opens a fresh engine with custom configuration.
pub fn create_test_engine_with(config: EngineConfig) -> Dolomite {
    Dolomite::open(config).expect("Failed to open test engine")
}

/// Inserts three well-known person documents.
pub fn insert_test_documents(collection: &Collection) -> DolomiteResult<()> {
    collection.insert_one(doc! {
        first_name: "fn1",
        last_name: "ln1",
        age: 30,
        tags: ["a", "b"],
    })?;
    collection.insert_one(doc! {
        first_name: "fn2",
        last_name: "ln2",
        age: 25,
        tags: ["b", "c"],
    })?;
    collection.insert_one(doc! {
        first_name: "fn3",
        last_name: "ln3",
        age: 40,
        tags: [],
    })?;
    Ok(())
}
