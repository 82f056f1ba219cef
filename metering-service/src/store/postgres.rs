use metering_client::{
    db::{cost_queries, sample_queries},
    domain::{CostAggregate, Sample},
};
use sqlx::postgres::PgPool;
use time::OffsetDateTime;

use super::{AggregateStore, SampleStore, StoreError};

/// Both stores over one Postgres-wire pool (`sensor_data` / `cost_aggregate`).
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn unavailable(e: anyhow::Error) -> StoreError {
    StoreError::Unavailable(format!("{e:#}"))
}

#[async_trait::async_trait]
impl SampleStore for PgStore {
    async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        sample_queries::insert_sample(&self.pool, sample)
            .await
            .map_err(unavailable)
    }

    async fn range_query(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<f64>, StoreError> {
        sample_queries::power_readings(&self.pool, from, to)
            .await
            .map_err(unavailable)
    }

    async fn delete_range(&self, up_to: OffsetDateTime) -> Result<u64, StoreError> {
        sample_queries::delete_samples_before(&self.pool, up_to)
            .await
            .map_err(unavailable)
    }
}

#[async_trait::async_trait]
impl AggregateStore for PgStore {
    async fn upsert(&self, aggregate: &CostAggregate) -> Result<(), StoreError> {
        cost_queries::upsert_cost_aggregate(&self.pool, aggregate)
            .await
            .map_err(unavailable)
    }
}
