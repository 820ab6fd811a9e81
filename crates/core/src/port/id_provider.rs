// ID Provider Ports (for deterministic testing)

use crate::domain::BatchId;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Random bytes behind every generated batch id (80 bits)
pub const BATCH_ID_ENTROPY_BYTES: usize = 10;

/// ID provider interface (allows deterministic IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique job ID
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Batch id generator
pub trait BatchIdProvider: Send + Sync {
    fn generate_bid(&self) -> BatchId;
}

/// Short URL-safe random token (14 chars for 80 bits)
pub struct RandomTokenProvider;

impl BatchIdProvider for RandomTokenProvider {
    fn generate_bid(&self) -> BatchId {
        let mut bytes = [0u8; BATCH_ID_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        // base64 URL_SAFE_NO_PAD never yields an empty or whitespace string
        BatchId::from_token(URL_SAFE_NO_PAD.encode(bytes))
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential ids: `<prefix>-1`, `<prefix>-2`, ...
    pub struct SequentialIdProvider {
        prefix: String,
        counter: AtomicU64,
    }

    impl SequentialIdProvider {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                counter: AtomicU64::new(1),
            }
        }

        fn next(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("{}-{}", self.prefix, n)
        }
    }

    impl IdProvider for SequentialIdProvider {
        fn generate_id(&self) -> String {
            self.next()
        }
    }

    impl BatchIdProvider for SequentialIdProvider {
        fn generate_bid(&self) -> BatchId {
            BatchId::from_token(self.next())
        }
    }
}
