//! Shared test utilities for queue testing
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic per-test type and queue names (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Features
//!
//! - `redis`: Enables Redis test infrastructure
//!
//! # Usage
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! async fn my_queue_test() {
//!     let redis = TestRedis::new().await;
//!     let queue = TestDataBuilder::from_test_name("my_queue_test").queue("Echo", "inq");
//!
//!     let broker = messaging::RedisBroker::connect(redis.connection_string()).await.unwrap();
//!     // ...
//!     assert!(redis.list(&queue).await.is_empty());
//! }
//! ```

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use self::redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// Tests sharing a broker use it to keep their queues apart.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_drain_order");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Type name unique to this test, e.g. `Echo12345`
    pub fn type_name(&self, base: &str) -> String {
        format!("{}{}", base, self.seed)
    }

    /// Queue name for a per-test type, e.g. `Echo12345.inq`
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.queue("Echo", "dlq"), "Echo7.dlq");
    /// ```
    pub fn queue(&self, base: &str, kind: &str) -> String {
        format!("{}.{}", self.type_name(base), kind)
    }
}

/// Test assertion helpers
pub mod assertions {
    use uuid::Uuid;

    /// Assert that ids appear in exactly the given order
    pub fn assert_ids_in_order(actual: &[Uuid], expected: &[Uuid], context: &str) {
        assert_eq!(
            actual, expected,
            "{}: messages out of order",
            context
        );
    }
}
