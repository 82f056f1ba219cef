use std::collections::BTreeMap;

use metering_client::domain::{CostAggregate, Granularity, Sample};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{AggregateStore, SampleStore, StoreError};

/// In-process stand-in for both tables.
///
/// Samples keep arrival order; range queries filter by value, so out-of-order
/// capture times are tolerated the same way the SQL store tolerates them.
#[derive(Default)]
pub struct MemoryStore {
    samples: Mutex<Vec<Sample>>,
    aggregates: Mutex<BTreeMap<(Granularity, OffsetDateTime), f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn samples(&self) -> Vec<Sample> {
        self.samples.lock().await.clone()
    }

    /// All aggregates ordered by granularity, then bucket.
    pub async fn aggregates(&self) -> Vec<CostAggregate> {
        self.aggregates
            .lock()
            .await
            .iter()
            .map(|(&(granularity, bucket_start), &total_cost)| CostAggregate {
                granularity,
                bucket_start,
                total_cost,
            })
            .collect()
    }

    pub async fn aggregate(
        &self,
        granularity: Granularity,
        bucket_start: OffsetDateTime,
    ) -> Option<f64> {
        self.aggregates
            .lock()
            .await
            .get(&(granularity, bucket_start))
            .copied()
    }
}

#[async_trait::async_trait]
impl SampleStore for MemoryStore {
    async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        self.samples.lock().await.push(sample.clone());
        Ok(())
    }

    async fn range_query(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<f64>, StoreError> {
        let samples = self.samples.lock().await;
        Ok(samples
            .iter()
            .filter(|s| s.captured_at >= from && s.captured_at <= to)
            .map(|s| s.power)
            .collect())
    }

    async fn delete_range(&self, up_to: OffsetDateTime) -> Result<u64, StoreError> {
        let mut samples = self.samples.lock().await;
        let before = samples.len();
        samples.retain(|s| s.captured_at >= up_to);
        Ok((before - samples.len()) as u64)
    }
}

#[async_trait::async_trait]
impl AggregateStore for MemoryStore {
    async fn upsert(&self, aggregate: &CostAggregate) -> Result<(), StoreError> {
        self.aggregates.lock().await.insert(
            (aggregate.granularity, aggregate.bucket_start.to_offset(time::UtcOffset::UTC)),
            aggregate.total_cost,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_at(captured_at: OffsetDateTime, power: f64) -> Sample {
        Sample {
            captured_at,
            voltage: 220.0,
            current: power / 220.0,
            power,
            energy: 0.0,
            frequency: 50.0,
            power_factor: 1.0,
        }
    }

    #[tokio::test]
    async fn range_query_is_inclusive_and_tolerates_out_of_order_arrival() {
        let store = MemoryStore::new();
        store.append(&sample_at(datetime!(2024-01-01 00:00:10 UTC), 10.0)).await.unwrap();
        store.append(&sample_at(datetime!(2024-01-01 00:00:00 UTC), 1.0)).await.unwrap();
        store.append(&sample_at(datetime!(2024-01-01 00:00:20 UTC), 20.0)).await.unwrap();
        store.append(&sample_at(datetime!(2024-01-01 00:00:30 UTC), 30.0)).await.unwrap();

        let mut got = store
            .range_query(datetime!(2024-01-01 00:00:00 UTC), datetime!(2024-01-01 00:00:20 UTC))
            .await
            .unwrap();
        got.sort_by(f64::total_cmp);

        assert_eq!(got, vec![1.0, 10.0, 20.0]);
    }

    #[tokio::test]
    async fn delete_range_removes_strictly_older_samples() {
        let store = MemoryStore::new();
        for secs in [0, 5, 10] {
            let ts = datetime!(2024-01-01 00:00:00 UTC) + time::Duration::seconds(secs);
            store.append(&sample_at(ts, 1.0)).await.unwrap();
        }

        let removed = store.delete_range(datetime!(2024-01-01 00:00:05 UTC)).await.unwrap();

        assert_eq!(removed, 1);
        let left: Vec<_> = store.samples().await.into_iter().map(|s| s.captured_at).collect();
        assert_eq!(
            left,
            vec![datetime!(2024-01-01 00:00:05 UTC), datetime!(2024-01-01 00:00:10 UTC)]
        );
    }

    #[tokio::test]
    async fn upsert_replaces_row_with_same_key() {
        let store = MemoryStore::new();
        let bucket = datetime!(2024-01-01 10:00:00 UTC);
        for total_cost in [1.0, 2.5] {
            store
                .upsert(&CostAggregate {
                    granularity: Granularity::Hour,
                    bucket_start: bucket,
                    total_cost,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.aggregates().await.len(), 1);
        assert_eq!(store.aggregate(Granularity::Hour, bucket).await, Some(2.5));
    }
}
