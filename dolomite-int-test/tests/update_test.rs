use dolomite::collection::{multi, upsert, FindAndModifyOptions, FindOptions, UpdateOptions};
use dolomite::common::Value;
use dolomite::doc;
use dolomite::errors::ErrorKind;
use dolomite_int_test::test_util::{create_test_engine, insert_test_documents};

#[test]
fn test_update_one_and_many() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    insert_test_documents(&collection).unwrap();

    let result = collection
        .update_one(
            &doc! { first_name: "fn1" },
            &doc! { "$set": { last_name: "renamed" } },
        )
        .unwrap();
    assert_eq!(result.matched(), 1);
    assert_eq!(result.modified(), 1);
    assert!(result.upserted_id().is_none());

    let result = collection
        .update_many(&doc! {}, &doc! { "$inc": { age: 1 } })
        .unwrap();
    assert_eq!(result.matched(), 3);
    assert_eq!(result.modified(), 3);
    assert_eq!(collection.count(&doc! { age: 31 }).unwrap(), 1);
}

#[test]
fn test_noop_update_matches_without_modifying() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    collection.insert_one(doc! { "_id": 1, a: 5 }).unwrap();

    let result = collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$set": { a: 5 } })
        .unwrap();
    assert_eq!(result.matched(), 1);
    assert_eq!(result.modified(), 0);
}

#[test]
fn test_replacement_update() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    collection
        .insert_one(doc! { "_id": 1, name: "old", extra: true })
        .unwrap();

    collection
        .update_one(&doc! { "_id": 1 }, &doc! { name: "new" })
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(found, doc! { "_id": 1, name: "new" });

    // replacing with a different _id is rejected
    let err = collection
        .update_one(&doc! { "_id": 1 }, &doc! { "_id": 2, name: "other" })
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::ImmutableField);
}

#[test]
fn test_upsert_composes_from_selector() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();

    let result = collection
        .update_with_options(
            &doc! { first_name: "fn4" },
            &doc! { "$set": { last_name: "ln4" } },
            &upsert(),
        )
        .unwrap();
    assert_eq!(result.matched(), 0);
    let upserted_id = result.upserted_id().cloned().unwrap();
    assert!(matches!(upserted_id, Value::ObjectId(_)));

    let found = collection
        .find_one(&doc! { first_name: "fn4" })
        .unwrap()
        .unwrap();
    assert_eq!(found.get_or_missing("last_name"), Value::from("ln4"));
    assert_eq!(collection.len().unwrap(), 1);

    // a second upsert with a matching selector updates instead
    let result = collection
        .update_with_options(
            &doc! { first_name: "fn4" },
            &doc! { "$set": { last_name: "changed" } },
            &upsert(),
        )
        .unwrap();
    assert_eq!(result.matched(), 1);
    assert!(result.upserted_id().is_none());
    assert_eq!(collection.len().unwrap(), 1);
}

#[test]
fn test_set_on_insert_only_applies_on_upsert_insert() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();

    collection
        .update_with_options(
            &doc! { key: 1 },
            &doc! { "$set": { touched: 1 }, "$setOnInsert": { created: true } },
            &upsert(),
        )
        .unwrap();
    let found = collection.find_one(&doc! { key: 1 }).unwrap().unwrap();
    assert_eq!(found.get_or_missing("created"), Value::Bool(true));

    collection
        .update_with_options(
            &doc! { key: 1 },
            &doc! { "$set": { touched: 2 }, "$setOnInsert": { created: false } },
            &upsert(),
        )
        .unwrap();
    let found = collection.find_one(&doc! { key: 1 }).unwrap().unwrap();
    // still true: $setOnInsert was inert on the matched update
    assert_eq!(found.get_or_missing("created"), Value::Bool(true));
    assert_eq!(found.get_or_missing("touched"), Value::Int32(2));
}

#[test]
fn test_positional_update_through_elem_match() {
    let engine = create_test_engine();
    let collection = engine.collection("test.games").unwrap();
    collection
        .insert_one(doc! { "_id": 1, arr: [{ x: 0 }, { x: 1 }, { x: 1 }] })
        .unwrap();

    collection
        .update_one(
            &doc! { arr: { "$elemMatch": { x: 1 } } },
            &doc! { "$set": { "arr.$.y": 9 } },
        )
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(
        found.get_or_missing("arr"),
        Value::Array(vec![
            Value::Document(doc! { x: 0 }),
            Value::Document(doc! { x: 1, y: 9 }),
            Value::Document(doc! { x: 1 }),
        ])
    );
}

#[test]
fn test_update_with_array_filters() {
    let engine = create_test_engine();
    let collection = engine.collection("test.students").unwrap();
    collection
        .insert_one(doc! { "_id": 1, grades: [95, 92, 90] })
        .unwrap();
    collection
        .insert_one(doc! { "_id": 2, grades: [98, 100, 102] })
        .unwrap();

    let options = UpdateOptions::new(true, false)
        .with_array_filters(vec![doc! { element: { "$gte": 100 } }]);
    collection
        .update_with_options(
            &doc! {},
            &doc! { "$set": { "grades.$[element]": 100 } },
            &options,
        )
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 2 }).unwrap().unwrap();
    assert_eq!(
        found.get_or_missing("grades"),
        Value::Array(vec![Value::Int32(98), Value::Int32(100), Value::Int32(100)])
    );
}

#[test]
fn test_conflicting_operators_fail_whole_update() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    collection.insert_one(doc! { "_id": 1, a: { b: 0 } }).unwrap();

    let err = collection
        .update_one(
            &doc! { "_id": 1 },
            &doc! { "$set": { "a.b": 1 }, "$unset": { a: 1 } },
        )
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::ConflictingUpdateOperators);
    // and nothing changed
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(found.get_or_missing("a"), Value::Document(doc! { b: 0 }));
}

#[test]
fn test_push_pull_round_trip() {
    let engine = create_test_engine();
    let collection = engine.collection("test.lists").unwrap();
    collection.insert_one(doc! { "_id": 1, xs: [1, 2] }).unwrap();

    collection
        .update_one(
            &doc! { "_id": 1 },
            &doc! { "$push": { xs: { "$each": [3, 4] } } },
        )
        .unwrap();
    collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$pull": { xs: { "$lt": 3 } } })
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(
        found.get_or_missing("xs"),
        Value::Array(vec![Value::Int32(3), Value::Int32(4)])
    );
}

#[test]
fn test_min_max_operators() {
    let engine = create_test_engine();
    let collection = engine.collection("test.scores").unwrap();
    collection
        .insert_one(doc! { "_id": 1, low: 5, high: 5 })
        .unwrap();

    collection
        .update_one(
            &doc! { "_id": 1 },
            &doc! { "$min": { low: 3 }, "$max": { high: 9, fresh: 1 } },
        )
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(found.get_or_missing("low"), Value::Int32(3));
    assert_eq!(found.get_or_missing("high"), Value::Int32(9));
    // a missing field is seeded by $max
    assert_eq!(found.get_or_missing("fresh"), Value::Int32(1));

    // out-of-bound values leave the document unmodified
    let result = collection
        .update_one(
            &doc! { "_id": 1 },
            &doc! { "$min": { low: 4 }, "$max": { high: 8 } },
        )
        .unwrap();
    assert_eq!(result.matched(), 1);
    assert_eq!(result.modified(), 0);
}

#[test]
fn test_pop_and_pull_all_operators() {
    let engine = create_test_engine();
    let collection = engine.collection("test.lists").unwrap();
    collection
        .insert_one(doc! { "_id": 1, xs: [1, 2, 3, 4, 2] })
        .unwrap();

    collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$pop": { xs: 1 } })
        .unwrap();
    collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$pop": { xs: (-1) } })
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(
        found.get_or_missing("xs"),
        Value::Array(vec![Value::Int32(2), Value::Int32(3), Value::Int32(4)])
    );

    collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$pullAll": { xs: [2, 4] } })
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(
        found.get_or_missing("xs"),
        Value::Array(vec![Value::Int32(3)])
    );

    let err = collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$pop": { xs: 2 } })
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::FailedToParse);
}

#[test]
fn test_bit_operator() {
    let engine = create_test_engine();
    let collection = engine.collection("test.flags").unwrap();
    collection
        .insert_one(doc! { "_id": 1, mask: 13 })
        .unwrap();

    collection
        .update_one(
            &doc! { "_id": 1 },
            &doc! { "$bit": { mask: { and: 10 }, seeded: { or: 6 } } },
        )
        .unwrap();
    let found = collection.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
    assert_eq!(found.get_or_missing("mask"), Value::Int32(8));
    assert_eq!(found.get_or_missing("seeded"), Value::Int32(6));

    let err = collection
        .update_one(&doc! { "_id": 1 }, &doc! { "$bit": { mask: { not: 1 } } })
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::FailedToParse);
}

#[test]
fn test_multi_update_shares_compiled_predicates() {
    let engine = create_test_engine();
    let collection = engine.collection("test.items").unwrap();
    for i in 0..20 {
        collection
            .insert_one(doc! { n: (i as i64), tags: ["keep", "drop"] })
            .unwrap();
    }
    let result = collection
        .update_with_options(
            &doc! { n: { "$gte": 10 } },
            &doc! { "$pull": { tags: "drop" } },
            &multi(),
        )
        .unwrap();
    assert_eq!(result.matched(), 10);
    assert_eq!(result.modified(), 10);
    assert_eq!(collection.count(&doc! { tags: "drop" }).unwrap(), 10);
}

#[test]
fn test_find_and_modify_returns_pre_and_post_image() {
    let engine = create_test_engine();
    let collection = engine.collection("test.counters").unwrap();
    collection.insert_one(doc! { "_id": "seq", n: 1 }).unwrap();

    let pre = collection
        .find_and_modify(
            &FindAndModifyOptions::query(doc! { "_id": "seq" })
                .with_update(doc! { "$inc": { n: 1 } }),
        )
        .unwrap()
        .unwrap();
    assert_eq!(pre.get_or_missing("n"), Value::Int32(1));

    let post = collection
        .find_and_modify(
            &FindAndModifyOptions::query(doc! { "_id": "seq" })
                .with_update(doc! { "$inc": { n: 1 } })
                .with_return_new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(post.get_or_missing("n"), Value::Int32(3));
}

#[test]
fn test_find_and_modify_remove() {
    let engine = create_test_engine();
    let collection = engine.collection("test.queue").unwrap();
    collection.insert_one(doc! { "_id": 1, priority: 2 }).unwrap();
    collection.insert_one(doc! { "_id": 2, priority: 1 }).unwrap();

    let removed = collection
        .find_and_modify(
            &FindAndModifyOptions::query(doc! {})
                .with_sort(&doc! { priority: 1 })
                .unwrap()
                .with_remove(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(removed.get_or_missing("_id"), Value::Int32(2));
    assert_eq!(collection.len().unwrap(), 1);
}

#[test]
fn test_find_and_modify_upsert() {
    let engine = create_test_engine();
    let collection = engine.collection("test.counters").unwrap();

    let created = collection
        .find_and_modify(
            &FindAndModifyOptions::query(doc! { "_id": "seq" })
                .with_update(doc! { "$inc": { n: 1 } })
                .with_upsert()
                .with_return_new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(created.get_or_missing("n"), Value::Int32(1));
    assert_eq!(created.get_or_missing("_id"), Value::from("seq"));
}

#[test]
fn test_find_and_modify_validation() {
    let engine = create_test_engine();
    let collection = engine.collection("test.counters").unwrap();

    let err = collection
        .find_and_modify(&FindAndModifyOptions::query(doc! {}))
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::FailedToParse);

    let err = collection
        .find_and_modify(
            &FindAndModifyOptions::query(doc! {})
                .with_update(doc! { "$inc": { n: 1 } })
                .with_remove(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::FailedToParse);
}

#[test]
fn test_update_preserves_unmatched_documents() {
    let engine = create_test_engine();
    let collection = engine.collection("test.people").unwrap();
    insert_test_documents(&collection).unwrap();

    collection
        .update_one(
            &doc! { first_name: "fn2" },
            &doc! { "$set": { marked: true } },
        )
        .unwrap();
    let untouched = collection
        .find(&doc! { marked: { "$exists": false } }, &FindOptions::new())
        .unwrap();
    assert_eq!(untouched.len(), 2);
}
