//! Storage Module Tests
//!
//! Validates the local persistence contract replicas rely on.
//!
//! ## Test Scopes
//! - **Last-write-wins**: stale puts are ignored but acknowledged, newer puts overwrite.
//! - **Error codes**: missing keys map to `\x01`, engine faults to `\x06`.
//! - **Execution**: operations produce the reply a replica sends back to its coordinator.

#[cfg(test)]
mod tests {
    use crate::protocol::message::Operation;
    use crate::protocol::types::ErrorCode;
    use crate::ring::types::{KeyHash, NodeHash};
    use crate::storage::engine::{EngineError, PersistenceEngine};
    use crate::storage::stage::PersistenceStage;
    use crate::storage::types::{StoredValue, Timestamp};

    fn ts(value: &str) -> Timestamp {
        Timestamp(value.to_string())
    }

    fn key() -> KeyHash {
        KeyHash::for_key("key")
    }

    // Engine whose every call fails, to exercise the fault path.
    struct BrokenEngine;

    impl PersistenceEngine for BrokenEngine {
        fn put(&self, _key: KeyHash, _value: StoredValue) -> Result<(), EngineError> {
            Err(EngineError::Fault("disk on fire".to_string()))
        }

        fn get(&self, _key: &KeyHash) -> Result<StoredValue, EngineError> {
            Err(EngineError::Fault("disk on fire".to_string()))
        }

        fn delete(&self, _key: &KeyHash) -> Result<(), EngineError> {
            Err(EngineError::Fault("disk on fire".to_string()))
        }

        fn keys(&self) -> Vec<KeyHash> {
            Vec::new()
        }

        fn len(&self) -> usize {
            0
        }
    }

    // ============================================================
    // PUT TESTS
    // ============================================================

    #[test]
    fn test_put_new_key_succeeds() {
        let mut stage = PersistenceStage::default();

        let code = stage.put(key(), StoredValue::new("value", ts("2024-01-01T00:00:00.000000Z")));

        assert_eq!(code, ErrorCode::Success);
        assert_eq!(stage.get(&key()).unwrap().value, "value");
    }

    #[test]
    fn test_put_newer_timestamp_overwrites() {
        let mut stage = PersistenceStage::default();
        stage.put(key(), StoredValue::new("old", ts("2024-01-01T00:00:00.000000Z")));

        let code = stage.put(key(), StoredValue::new("new", ts("2024-01-01T00:00:00.000001Z")));

        assert_eq!(code, ErrorCode::Success);
        assert_eq!(stage.get(&key()).unwrap().value, "new");
    }

    #[test]
    fn test_put_older_timestamp_is_ignored_but_succeeds() {
        let mut stage = PersistenceStage::default();
        stage.put(key(), StoredValue::new("current", ts("2024-06-01T00:00:00.000000Z")));

        let code = stage.put(key(), StoredValue::new("stale", ts("2024-01-01T00:00:00.000000Z")));

        assert_eq!(code, ErrorCode::Success);
        let stored = stage.get(&key()).unwrap();
        assert_eq!(stored.value, "current");
        assert_eq!(stored.timestamp, ts("2024-06-01T00:00:00.000000Z"));
    }

    #[test]
    fn test_put_equal_timestamp_is_ignored() {
        let mut stage = PersistenceStage::default();
        let when = ts("2024-06-01T00:00:00.000000Z");
        stage.put(key(), StoredValue::new("first", when.clone()));

        assert_eq!(stage.put(key(), StoredValue::new("second", when)), ErrorCode::Success);
        assert_eq!(stage.get(&key()).unwrap().value, "first");
    }

    #[test]
    fn test_timestamp_now_orders_chronologically() {
        let earlier = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = Timestamp::now();

        assert!(earlier < later);
        assert_eq!(earlier.as_str().len(), "2024-01-01T00:00:00.000000Z".len());
    }

    // ============================================================
    // GET / DELETE TESTS
    // ============================================================

    #[test]
    fn test_get_missing_key() {
        let stage = PersistenceStage::default();
        assert_eq!(stage.get(&key()), Err(ErrorCode::KeyNotFound));
    }

    #[test]
    fn test_delete_existing_key() {
        let mut stage = PersistenceStage::default();
        stage.put(key(), StoredValue::new("value", Timestamp::now()));

        assert_eq!(stage.delete(&key()), ErrorCode::Success);
        assert_eq!(stage.get(&key()), Err(ErrorCode::KeyNotFound));
        assert!(stage.is_empty());
    }

    #[test]
    fn test_delete_missing_key() {
        let mut stage = PersistenceStage::default();
        assert_eq!(stage.delete(&key()), ErrorCode::KeyNotFound);
    }

    #[test]
    fn test_keys_lists_stored_hashes() {
        let mut stage = PersistenceStage::default();
        for i in 0..5 {
            stage.put(
                KeyHash::for_key(&format!("key-{}", i)),
                StoredValue::new("v", Timestamp::now()),
            );
        }

        let mut keys = stage.keys();
        keys.sort();
        assert_eq!(keys.len(), 5);
        assert!(keys.contains(&KeyHash::for_key("key-3")));
    }

    #[test]
    fn test_len_counts_through_engine() {
        // An engine that cannot enumerate keys still reports its size.
        struct CountingEngine;

        impl PersistenceEngine for CountingEngine {
            fn put(&self, _key: KeyHash, _value: StoredValue) -> Result<(), EngineError> {
                Ok(())
            }

            fn get(&self, _key: &KeyHash) -> Result<StoredValue, EngineError> {
                Err(EngineError::NotFound)
            }

            fn delete(&self, _key: &KeyHash) -> Result<(), EngineError> {
                Err(EngineError::NotFound)
            }

            fn keys(&self) -> Vec<KeyHash> {
                Vec::new()
            }

            fn len(&self) -> usize {
                7
            }
        }

        let stage = PersistenceStage::new(Box::new(CountingEngine));
        assert!(stage.keys().is_empty());
        assert_eq!(stage.len(), 7);
        assert!(!stage.is_empty());

        let mut memory = PersistenceStage::default();
        for i in 0..3 {
            memory.put(
                KeyHash::for_key(&format!("key-{}", i)),
                StoredValue::new("v", Timestamp::now()),
            );
        }
        memory.delete(&KeyHash::for_key("key-0"));
        assert_eq!(memory.len(), 2);
    }

    // ============================================================
    // FAULT TESTS
    // ============================================================

    #[test]
    fn test_engine_faults_map_to_unclassified() {
        let mut stage = PersistenceStage::new(Box::new(BrokenEngine));

        assert_eq!(
            stage.put(key(), StoredValue::new("v", Timestamp::now())),
            ErrorCode::Unclassified
        );
        assert_eq!(stage.get(&key()), Err(ErrorCode::Unclassified));
        assert_eq!(stage.delete(&key()), ErrorCode::Unclassified);
    }

    // ============================================================
    // EXECUTE TESTS
    // ============================================================

    #[test]
    fn test_execute_get_reply_carries_value_and_timestamp() {
        let mut stage = PersistenceStage::default();
        let node = NodeHash("node".to_string());
        let when = ts("2024-03-03T03:03:03.000000Z");

        let put = stage.execute(
            &Operation::Put {
                key: key(),
                value: "v1".to_string(),
                timestamp: when.clone(),
            },
            &node,
        );
        assert_eq!(put.error_code, ErrorCode::Success);
        assert_eq!(put.node_hash, node);
        assert!(put.value.is_none());

        let get = stage.execute(&Operation::Get { key: key() }, &node);
        assert_eq!(get.error_code, ErrorCode::Success);
        assert_eq!(get.value.as_deref(), Some("v1"));
        assert_eq!(get.timestamp, Some(when));

        let delete = stage.execute(&Operation::Delete { key: key() }, &node);
        assert_eq!(delete.error_code, ErrorCode::Success);

        let missing = stage.execute(&Operation::Get { key: key() }, &node);
        assert_eq!(missing.error_code, ErrorCode::KeyNotFound);
        assert!(missing.timestamp.is_none());
    }
}
