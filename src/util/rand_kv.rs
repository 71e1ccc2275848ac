use bytes::Bytes;

/// Deterministic test key, e.g. `embercask-key-000000042`.
pub fn get_test_key(i: usize) -> Bytes {
  Bytes::from(format!("embercask-key-{:09}", i))
}

/// Deterministic test value matching `get_test_key`.
pub fn get_test_value(i: usize) -> Bytes {
  Bytes::from(format!("embercask-value-{:09}", i))
}
