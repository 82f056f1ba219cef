use anyhow::Result;
use sqlx::PgPool;

/// DDL for both tables, kept in sync with `sql/schema/01_metering.sql`.
const SCHEMA_SQL: &str = include_str!("../../sql/schema/01_metering.sql");

/// Create `sensor_data` and `cost_aggregate` if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in statements(SCHEMA_SQL) {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| {
        s.lines()
            .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_three_statements() {
        let stmts: Vec<_> = statements(SCHEMA_SQL).collect();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].contains("CREATE TABLE IF NOT EXISTS sensor_data"));
        assert!(stmts[2].contains("PRIMARY KEY (period_type, bucket_start)"));
    }
}
