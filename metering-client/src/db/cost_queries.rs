use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{CostAggregate, Granularity};

/// Insert or replace the row keyed by `(period_type, bucket_start)`.
pub async fn upsert_cost_aggregate(pool: &PgPool, aggregate: &CostAggregate) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cost_aggregate (period_type, bucket_start, total_cost)
        VALUES ($1, $2, $3)
        ON CONFLICT (period_type, bucket_start)
        DO UPDATE SET total_cost = EXCLUDED.total_cost
        "#,
    )
    .bind(aggregate.granularity.as_str())
    .bind(aggregate.bucket_start)
    .bind(aggregate.total_cost)
    .execute(pool)
    .await?;

    Ok(())
}

/// Aggregates of one granularity with `start <= bucket_start < end`, in bucket order.
pub async fn cost_aggregates(
    pool: &PgPool,
    granularity: Granularity,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<CostAggregate>> {
    let rows: Vec<(String, OffsetDateTime, f64)> = sqlx::query_as(
        r#"
        SELECT period_type, bucket_start, total_cost
        FROM cost_aggregate
        WHERE period_type = $1
          AND bucket_start >= $2
          AND bucket_start <  $3
        ORDER BY bucket_start
        "#,
    )
    .bind(granularity.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(period_type, bucket_start, total_cost)| -> Result<CostAggregate> {
            Ok(CostAggregate {
                granularity: period_type.parse()?,
                bucket_start,
                total_cost,
            })
        })
        .collect()
}
