use time::OffsetDateTime;

use super::Granularity;

/// Cost of energy for one (granularity, bucket) key.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostAggregate {
    pub granularity: Granularity,
    pub bucket_start: OffsetDateTime,
    pub total_cost: f64,
}
