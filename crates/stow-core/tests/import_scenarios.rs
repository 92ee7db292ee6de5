//! # Import Scenario Tests
//!
//! End-to-end behaviour of the upsert and cleanup engines through the
//! session facade, on both backends.
//!
//! ## Groups
//! - S0: Idempotence
//! - S1: Null clears, absence preserves
//! - S2: List replacement
//! - S3: Cascade cleanup
//! - S4: Keyless types
//! - S5: Failure handling
//! - S6: Persistent backend

use serde_json::{Value, json};
use stow_core::{
    FieldMapping, FieldValue, InboundRef, KeyValue, RecordType, Schema, Session, StorePhase,
    StowError, SweepPolicy,
};

fn schema() -> Schema {
    Schema::new([
        RecordType::new("User")
            .primary_key("id")
            .field(FieldMapping::text("id"))
            .field(FieldMapping::text("name"))
            .field(FieldMapping::object("address", "Address"))
            .field(FieldMapping::list("dogs", "Dog"))
            .dependents(["Address", "Dog"]),
        RecordType::new("Address")
            .field(FieldMapping::text("city"))
            .sweep(SweepPolicy::Inbound(vec![InboundRef::new("User", "address")])),
        RecordType::new("Dog")
            .primary_key("id")
            .field(FieldMapping::text("id"))
            .field(FieldMapping::text("color"))
            .field(FieldMapping::list("toys", "Toy"))
            .dependents(["Toy"]),
        RecordType::new("Toy").field(FieldMapping::text("name")),
        RecordType::new("Log").field(FieldMapping::text("line")),
    ])
    .expect("schema")
}

fn import(session: &mut Session, record_type: &str, json: Value) {
    session.import(record_type, &json).expect("import");
}

fn user(session: &Session, key: &str) -> stow_core::Record {
    session
        .find("User", &KeyValue::from(key))
        .expect("find")
        .expect("user exists")
}

// =============================================================================
// S0: IDEMPOTENCE
// =============================================================================

mod s0_idempotence {
    use super::*;

    /// S0.1: Importing the same document twice keeps one record per key.
    #[test]
    fn repeated_import_keeps_one_record() {
        let mut session = Session::new(schema());
        let doc = json!({"id": "1", "name": "Ann", "dogs": [{"id": "d1"}]});
        import(&mut session, "User", doc.clone());
        import(&mut session, "User", doc);

        assert_eq!(session.count("User").expect("count"), 1);
        assert_eq!(session.count("Dog").expect("count"), 1);
    }

    /// S0.2: The standalone Dog update reaches the dog owned by a User.
    #[test]
    fn standalone_update_reaches_nested_record() {
        let mut session = Session::new(schema());
        import(
            &mut session,
            "User",
            json!({"id": "1", "dogs": [{"id": "1", "color": "Black"}]}),
        );
        import(&mut session, "Dog", json!({"id": "1", "color": "Black new"}));

        let owner = user(&session, "1");
        let dog = session
            .get(owner.list("dogs")[0])
            .expect("get")
            .expect("dog exists");
        assert_eq!(dog.text("color"), Some("Black new"));
        assert_eq!(session.count("User").expect("count"), 1);
        assert_eq!(session.count("Dog").expect("count"), 1);
    }

    /// S0.3: Arrays of documents resolve duplicates to one record.
    #[test]
    fn array_import_merges_duplicates() {
        let mut session = Session::new(schema());
        let ids = session
            .import(
                "Dog",
                &json!([{"id": "1", "color": "a"}, {"id": "1", "color": "b"}]),
            )
            .expect("import");
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
        let dog = session.get(ids[0]).expect("get").expect("dog");
        assert_eq!(dog.text("color"), Some("b"));
    }
}

// =============================================================================
// S1: NULL CLEARS, ABSENCE PRESERVES
// =============================================================================

mod s1_null_and_absent {
    use super::*;

    /// S1.1: An explicit null clears an object relationship.
    #[test]
    fn null_clears_relationship() {
        let mut session = Session::new(schema());
        import(
            &mut session,
            "User",
            json!({"id": "1", "address": {"city": "Oslo"}}),
        );
        import(&mut session, "User", json!({"id": "1", "address": null}));
        assert_eq!(user(&session, "1").object("address"), None);
    }

    /// S1.2: An absent key leaves relationships and scalars untouched.
    #[test]
    fn absent_key_preserves() {
        let mut session = Session::new(schema());
        import(
            &mut session,
            "User",
            json!({"id": "1", "name": "Ann", "address": {"city": "Oslo"}, "dogs": [{"id": "d"}]}),
        );
        let before = user(&session, "1");
        import(&mut session, "User", json!({"id": "1"}));
        let after = user(&session, "1");

        assert_eq!(after, before);
        assert_eq!(after.text("name"), Some("Ann"));
    }

    /// S1.3: An explicit null scalar is stored as empty, not an error.
    #[test]
    fn null_scalar_is_emptied() {
        let mut session = Session::new(schema());
        import(&mut session, "User", json!({"id": "1", "name": "Ann"}));
        import(&mut session, "User", json!({"id": "1", "name": null}));
        assert_eq!(user(&session, "1").field("name"), Some(&FieldValue::Null));
    }

    /// S1.4: Undeclared keys are ignored.
    #[test]
    fn undeclared_keys_ignored() {
        let mut session = Session::new(schema());
        import(&mut session, "User", json!({"id": "1", "age": 40}));
        let record = user(&session, "1");
        assert!(record.field("age").is_none());
    }
}

// =============================================================================
// S2: LIST REPLACEMENT
// =============================================================================

mod s2_list_replacement {
    use super::*;

    /// S2.1: A shorter array unlinks the extra elements.
    #[test]
    fn shorter_list_replaces_totally() {
        let mut session = Session::new(schema());
        import(
            &mut session,
            "User",
            json!({"id": "1", "dogs": [{"id": "a"}, {"id": "b"}, {"id": "c"}]}),
        );
        import(&mut session, "User", json!({"id": "1", "dogs": [{"id": "c"}]}));

        let owner = user(&session, "1");
        assert_eq!(owner.list("dogs").len(), 1);
        // Unlinked, not deleted.
        assert_eq!(session.count("Dog").expect("count"), 3);
    }

    /// S2.2: Null and the empty array both clear the list.
    #[test]
    fn null_and_empty_clear() {
        for clear in [Value::Null, json!([])] {
            let mut session = Session::new(schema());
            import(&mut session, "User", json!({"id": "1", "dogs": [{"id": "a"}]}));
            import(&mut session, "User", json!({"id": "1", "dogs": clear}));
            assert!(user(&session, "1").list("dogs").is_empty());
        }
    }
}

// =============================================================================
// S3: CASCADE CLEANUP
// =============================================================================

mod s3_cascade {
    use super::*;

    /// S3.1: Orphans go, shared children stay.
    #[test]
    fn removes_orphans_only() {
        let mut session = Session::new(schema());
        import(
            &mut session,
            "User",
            json!({"id": "1", "dogs": [{"id": "solo"}, {"id": "shared"}]}),
        );
        import(&mut session, "User", json!({"id": "2", "dogs": [{"id": "shared"}]}));

        let ann = user(&session, "1");
        session.write(|s| s.delete(ann.id)).expect("delete");

        assert!(session.find("Dog", &KeyValue::from("solo")).expect("find").is_none());
        assert!(session.find("Dog", &KeyValue::from("shared")).expect("find").is_some());
    }

    /// S3.2: Cleanup recurses through dependents of dependents.
    #[test]
    fn cleanup_is_transitive() {
        let mut session = Session::new(schema());
        import(
            &mut session,
            "User",
            json!({"id": "1", "address": {"city": "Oslo"}, "dogs": [{"id": "a", "toys": [{"name": "ball"}]}]}),
        );
        assert_eq!(session.len().expect("len"), 4);

        session
            .write(|s| s.delete_all_of("User"))
            .expect("delete");

        assert!(session.is_empty().expect("empty"));
    }

    /// S3.3: Deleting a type without dependents sweeps nothing.
    #[test]
    fn no_dependents_no_sweep() {
        let mut session = Session::new(schema());
        import(&mut session, "Dog", json!({"id": "a", "toys": [{"name": "ball"}]}));
        import(&mut session, "Log", json!({"line": "x"}));

        session.begin_write().expect("begin");
        session.delete_all_of("Log").expect("delete");
        let report = session.commit_write().expect("commit").expect("report");

        assert!(report.swept.is_empty());
        assert_eq!(session.count("Toy").expect("count"), 1);
    }

    /// S3.4: A failed body rolls back deletes and skips cleanup.
    #[test]
    fn rolled_back_delete_keeps_everything() {
        let mut session = Session::new(schema());
        import(&mut session, "User", json!({"id": "1", "dogs": [{"id": "a"}]}));

        let result: Result<(), StowError> = session.write(|s| {
            s.delete_all_of("User")?;
            Err(StowError::contract("User", "abort"))
        });
        assert!(result.is_err());
        assert_eq!(session.len().expect("len"), 2);
    }
}

// =============================================================================
// S4: KEYLESS TYPES
// =============================================================================

mod s4_keyless {
    use super::*;

    /// S4.1: Keyless documents never merge.
    #[test]
    fn keyless_never_merges() {
        let mut session = Session::new(schema());
        import(&mut session, "Log", json!({"line": "x"}));
        import(&mut session, "Log", json!({"line": "x"}));
        assert_eq!(session.count("Log").expect("count"), 2);
    }

    /// S4.2: Re-importing a parent creates fresh keyless children.
    #[test]
    fn keyless_children_are_recreated() {
        let mut session = Session::new(schema());
        import(&mut session, "User", json!({"id": "1", "address": {"city": "A"}}));
        import(&mut session, "User", json!({"id": "1", "address": {"city": "B"}}));
        assert_eq!(session.count("Address").expect("count"), 2);

        let owner = user(&session, "1");
        let address = session
            .get(owner.object("address").expect("linked"))
            .expect("get")
            .expect("address");
        assert_eq!(address.text("city"), Some("B"));
    }
}

// =============================================================================
// S5: FAILURE HANDLING
// =============================================================================

mod s5_failures {
    use super::*;

    /// S5.1: An unreadable primary key aborts the whole import.
    #[test]
    fn missing_key_aborts_import() {
        let mut session = Session::new(schema());
        let err = session
            .import("Dog", &json!([{"id": "1"}, {"color": "no id"}]))
            .expect_err("contract violation");
        assert!(matches!(err, StowError::SchemaContract { .. }));
        assert_eq!(session.count("Dog").expect("count"), 0);
    }

    /// S5.2: A mistyped primary key is a contract violation too.
    #[test]
    fn mistyped_key_aborts_import() {
        let mut session = Session::new(schema());
        let err = session
            .import("User", &json!({"id": 7}))
            .expect_err("contract violation");
        assert!(matches!(err, StowError::SchemaContract { .. }));
    }

    /// S5.3: Malformed elements are skipped, the rest imports.
    #[test]
    fn malformed_elements_skipped() {
        let mut session = Session::new(schema());
        let ids = session
            .import("Dog", &json!([{"id": "1"}, [1, 2], "x", {"id": "2"}]))
            .expect("import");
        assert_eq!(ids.len(), 2);
    }

    /// S5.4: Store failures carry their phase.
    #[test]
    fn unreadable_copy_is_init_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Session::open_copy(dir.path().join("missing.stow"), schema())
            .expect_err("missing file");
        assert_eq!(err.phase(), Some(StorePhase::Init));
    }
}

// =============================================================================
// S6: PERSISTENT BACKEND
// =============================================================================

mod s6_redb {
    use super::*;

    /// S6.1: Imports and cleanup survive reopening the database.
    #[test]
    fn redb_session_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stow.redb");
        {
            let mut session = Session::with_redb(&path, schema()).expect("open");
            import(
                &mut session,
                "User",
                json!({"id": "1", "dogs": [{"id": "1", "color": "Black"}]}),
            );
            import(&mut session, "User", json!({"id": "2", "dogs": [{"id": "2"}]}));
            session
                .write(|s| {
                    let doomed = s.find("User", &KeyValue::from("2"))?;
                    match doomed {
                        Some(record) => s.delete(record.id),
                        None => Ok(()),
                    }
                })
                .expect("delete");
        }

        let session = Session::with_redb(&path, schema()).expect("reopen");
        assert!(session.is_persistent());
        assert_eq!(session.count("User").expect("count"), 1);
        assert_eq!(session.count("Dog").expect("count"), 1);
        let owner = user(&session, "1");
        let dog = session.get(owner.list("dogs")[0]).expect("get").expect("dog");
        assert_eq!(dog.text("color"), Some("Black"));
    }
}
