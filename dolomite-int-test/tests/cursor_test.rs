use dolomite::collection::FindOptions;
use dolomite::common::Value;
use dolomite::config::EngineConfig;
use dolomite::doc;
use dolomite::errors::ErrorKind;
use dolomite_int_test::test_util::{create_test_engine, create_test_engine_with};
use std::time::Duration;

fn seed(collection: &dolomite::collection::Collection, count: i64) {
    let documents: Vec<dolomite::Document> =
        (0..count).map(|n| doc! { "_id": n, n: n }).collect();
    let result = collection.insert_many(documents, true).unwrap();
    assert!(!result.has_errors());
}

#[test]
fn test_small_result_is_exhausted_immediately() {
    let engine = create_test_engine();
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 5);

    let (batch, cursor_id) = collection
        .find_with_cursor(&doc! {}, &FindOptions::new())
        .unwrap();
    assert_eq!(batch.len(), 5);
    assert_eq!(cursor_id, 0);
    assert_eq!(engine.cursors().open_cursor_count(), 0);
}

#[test]
fn test_get_more_drains_in_batches() {
    let engine = create_test_engine_with(EngineConfig::new().with_max_batch_size(10));
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 25);

    let options = FindOptions::new().with_sort(&doc! { n: 1 }).unwrap();
    let (batch, cursor_id) = collection.find_with_cursor(&doc! {}, &options).unwrap();
    assert_eq!(batch.len(), 10);
    assert_ne!(cursor_id, 0);

    let (second, id) = engine.get_more(cursor_id, None).unwrap();
    assert_eq!(second.len(), 10);
    assert_eq!(id, cursor_id);
    assert_eq!(second[0].get_or_missing("n"), Value::Int64(10));

    let (third, id) = engine.get_more(cursor_id, None).unwrap();
    assert_eq!(third.len(), 5);
    // exhaustion resets the cursor id to 0 and deallocates
    assert_eq!(id, 0);
    assert_eq!(engine.cursors().open_cursor_count(), 0);

    let err = engine.get_more(cursor_id, None).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
}

#[test]
fn test_get_more_observes_per_batch_snapshot() {
    let engine = create_test_engine_with(EngineConfig::new().with_max_batch_size(2));
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 4);

    let options = FindOptions::new().with_sort(&doc! { n: 1 }).unwrap();
    let (batch, cursor_id) = collection.find_with_cursor(&doc! {}, &options).unwrap();
    assert_eq!(batch.len(), 2);

    // a document inserted between batches is visible to the next batch
    collection.insert_one(doc! { "_id": 99, n: 99_i64 }).unwrap();
    let (rest, id) = engine.get_more(cursor_id, Some(10)).unwrap();
    assert_eq!(id, 0);
    let values: Vec<Value> = rest
        .iter()
        .map(|document| document.get_or_missing("n"))
        .collect();
    assert_eq!(
        values,
        vec![Value::Int64(2), Value::Int64(3), Value::Int64(99)]
    );
}

#[test]
fn test_cursor_projection_applies_per_batch() {
    let engine = create_test_engine_with(EngineConfig::new().with_max_batch_size(2));
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 3);

    let options = FindOptions::new()
        .with_sort(&doc! { n: 1 })
        .unwrap()
        .with_projection(&doc! { "_id": 0, n: 1 })
        .unwrap();
    let (batch, cursor_id) = collection.find_with_cursor(&doc! {}, &options).unwrap();
    assert_eq!(batch, vec![doc! { n: 0_i64 }, doc! { n: 1_i64 }]);
    let (rest, id) = engine.get_more(cursor_id, None).unwrap();
    assert_eq!(rest, vec![doc! { n: 2_i64 }]);
    assert_eq!(id, 0);
}

#[test]
fn test_kill_cursors() {
    let engine = create_test_engine_with(EngineConfig::new().with_max_batch_size(1));
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 3);

    let (_, cursor_id) = collection
        .find_with_cursor(&doc! {}, &FindOptions::new())
        .unwrap();
    assert_ne!(cursor_id, 0);

    let (killed, not_found) = engine.kill_cursors(&[cursor_id, 424242]);
    assert_eq!(killed, vec![cursor_id]);
    assert_eq!(not_found, vec![424242]);

    let err = engine.get_more(cursor_id, None).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
}

#[test]
fn test_idle_cursor_reaping() {
    let engine = create_test_engine_with(EngineConfig::new().with_max_batch_size(1));
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 3);

    let (_, cursor_id) = collection
        .find_with_cursor(&doc! {}, &FindOptions::new())
        .unwrap();
    assert_ne!(cursor_id, 0);
    assert_eq!(engine.cursors().open_cursor_count(), 1);

    std::thread::sleep(Duration::from_millis(20));
    let reaped = engine.cursors().reap_expired(Duration::from_millis(1));
    assert_eq!(reaped, 1);
    assert_eq!(engine.cursors().open_cursor_count(), 0);
}

#[test]
fn test_dropping_collection_kills_its_cursors() {
    let engine = create_test_engine_with(EngineConfig::new().with_max_batch_size(1));
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 3);

    let (_, cursor_id) = collection
        .find_with_cursor(&doc! {}, &FindOptions::new())
        .unwrap();
    engine.drop_collection("test.nums").unwrap();

    let err = engine.get_more(cursor_id, None).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
}

#[test]
fn test_max_time_ms_expires() {
    let engine = create_test_engine();
    let collection = engine.collection("test.nums").unwrap();
    seed(&collection, 100);

    let options = FindOptions::new().with_max_time_ms(0);
    std::thread::sleep(Duration::from_millis(5));
    let err = collection.find(&doc! {}, &options).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::MaxTimeMSExpired);
}
