//! # Property-Based Tests
//!
//! Invariants of the upsert and cleanup engines under generated documents.

use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use stow_core::{FieldMapping, KeyValue, RecordType, Schema, Session, record_to_json};

fn schema() -> Schema {
    Schema::new([
        RecordType::new("User")
            .primary_key("id")
            .field(FieldMapping::int("id"))
            .field(FieldMapping::text("name"))
            .field(FieldMapping::list("dogs", "Dog"))
            .dependents(["Dog"]),
        RecordType::new("Dog")
            .primary_key("id")
            .field(FieldMapping::int("id"))
            .field(FieldMapping::text("color")),
        RecordType::new("Note").field(FieldMapping::text("body")),
    ])
    .expect("schema")
}

fn user_doc(id: i64, dogs: &[i64]) -> Value {
    let dogs: Vec<Value> = dogs.iter().map(|d| json!({"id": d})).collect();
    json!({"id": id, "name": format!("user-{id}"), "dogs": dogs})
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// One record per distinct primary key, however often a key repeats.
    #[test]
    fn one_record_per_distinct_key(ids in vec(0i64..20, 1..40)) {
        let mut session = Session::new(schema());
        let docs: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
        session.import("Dog", &Value::Array(docs)).expect("import");

        let distinct: BTreeSet<_> = ids.iter().collect();
        prop_assert_eq!(session.count("Dog").expect("count"), distinct.len());
    }

    /// Importing a document a second time changes nothing.
    #[test]
    fn reimport_is_idempotent(id in 0i64..100, dogs in vec(0i64..10, 0..8)) {
        let mut session = Session::new(schema());
        let doc = user_doc(id, &dogs);
        session.import("User", &doc).expect("first import");
        let user = session.find("User", &KeyValue::Int(id)).expect("find").expect("user");
        let first = record_to_json(&session, user.id).expect("export");
        let total = session.len().expect("len");

        session.import("User", &doc).expect("second import");
        prop_assert_eq!(record_to_json(&session, user.id).expect("export"), first);
        prop_assert_eq!(session.len().expect("len"), total);
    }

    /// The list holds exactly the last imported array, in order.
    #[test]
    fn list_matches_last_import(first in vec(0i64..10, 0..8), second in vec(0i64..10, 0..8)) {
        let mut session = Session::new(schema());
        session.import("User", &user_doc(1, &first)).expect("import");
        session.import("User", &user_doc(1, &second)).expect("import");

        let user = session.find("User", &KeyValue::Int(1)).expect("find").expect("user");
        let keys: Vec<KeyValue> = user
            .list("dogs")
            .iter()
            .map(|id| session.get(*id).expect("get").expect("dog").key.clone().expect("key"))
            .collect();
        let expected: Vec<KeyValue> = second.iter().map(|d| KeyValue::Int(*d)).collect();
        prop_assert_eq!(keys, expected);
    }

    /// Keyless imports always add a record.
    #[test]
    fn keyless_imports_accumulate(bodies in vec("[a-z]{0,6}", 1..20)) {
        let mut session = Session::new(schema());
        for body in &bodies {
            session.import("Note", &json!({"body": body})).expect("import");
        }
        prop_assert_eq!(session.count("Note").expect("count"), bodies.len());
    }

    /// After deleting users, exactly the dogs still referenced survive.
    #[test]
    fn cleanup_keeps_referenced_dogs(
        owners in vec(vec(0i64..12, 0..5), 1..6),
        doomed in vec(any::<bool>(), 6),
    ) {
        let mut session = Session::new(schema());
        for (user, dogs) in owners.iter().enumerate() {
            session.import("User", &user_doc(user as i64, dogs)).expect("import");
        }

        session
            .write(|s| {
                for (user, delete) in doomed.iter().enumerate().take(owners.len()) {
                    if *delete {
                        if let Some(record) = s.find("User", &KeyValue::Int(user as i64))? {
                            s.delete(record.id)?;
                        }
                    }
                }
                Ok(())
            })
            .expect("delete");

        let survivors: BTreeSet<i64> = owners
            .iter()
            .enumerate()
            .filter(|(user, _)| !doomed[*user])
            .flat_map(|(_, dogs)| dogs.iter().copied())
            .collect();
        let any_deleted = doomed.iter().take(owners.len()).any(|d| *d);
        let all_dogs: BTreeSet<i64> = owners.iter().flatten().copied().collect();
        let expected = if any_deleted { survivors } else { all_dogs };

        let remaining: BTreeSet<i64> = session
            .objects("Dog")
            .expect("objects")
            .iter()
            .filter_map(|dog| match &dog.key {
                Some(KeyValue::Int(key)) => Some(*key),
                _ => None,
            })
            .collect();
        prop_assert_eq!(remaining, expected);
    }
}
