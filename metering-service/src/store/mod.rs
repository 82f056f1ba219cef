//! Persistence seams for raw samples and cost aggregates.
//!
//! Each operation is a single atomic statement against the backing store.
//! Nothing here coordinates appends with retention deletes: a sample appended
//! with `captured_at` just below a concurrent delete's cutoff may be removed
//! before any tick reads it.

use metering_client::domain::{CostAggregate, Sample};
use time::OffsetDateTime;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug, Clone)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only table of raw samples, queried and retired by capture time.
#[async_trait::async_trait]
pub trait SampleStore: Send + Sync {
    async fn append(&self, sample: &Sample) -> Result<(), StoreError>;

    /// Power readings with `from <= captured_at <= to`, in no particular order.
    async fn range_query(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<f64>, StoreError>;

    /// Remove samples with `captured_at < up_to`. Returns how many were removed.
    async fn delete_range(&self, up_to: OffsetDateTime) -> Result<u64, StoreError>;
}

/// Cost aggregates keyed by (granularity, bucket start).
#[async_trait::async_trait]
pub trait AggregateStore: Send + Sync {
    /// Insert, or replace the row with the same key.
    async fn upsert(&self, aggregate: &CostAggregate) -> Result<(), StoreError>;
}
