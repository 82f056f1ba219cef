use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::Sample;

/// Append one raw sample to `sensor_data`.
pub async fn insert_sample(pool: &PgPool, sample: &Sample) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sensor_data
            (captured_at, voltage, current, power, energy, frequency, power_factor)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(sample.captured_at)
    .bind(sample.voltage)
    .bind(sample.current)
    .bind(sample.power)
    .bind(sample.energy)
    .bind(sample.frequency)
    .bind(sample.power_factor)
    .execute(pool)
    .await?;

    Ok(())
}

/// Power readings (W) captured within `[from, to]`, both ends inclusive.
pub async fn power_readings(
    pool: &PgPool,
    from: OffsetDateTime,
    to: OffsetDateTime,
) -> Result<Vec<f64>> {
    let rows: Vec<(f64,)> = sqlx::query_as(
        r#"
        SELECT power
        FROM sensor_data
        WHERE captured_at >= $1
          AND captured_at <= $2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(power,)| power).collect())
}

/// Delete every sample captured strictly before `cutoff`. Returns rows removed.
pub async fn delete_samples_before(pool: &PgPool, cutoff: OffsetDateTime) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sensor_data WHERE captured_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
