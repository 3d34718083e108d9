use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use reqflow_core::domain::org::{CostCenter, EmployeeId};
use reqflow_core::domain::requisition::{
    LineItem, ProductRef, Requisition, RequisitionId, RequisitionStatus,
};

use super::{RepositoryError, RequisitionRepository};
use crate::DbPool;

pub struct SqlRequisitionRepository {
    pool: DbPool,
}

impl SqlRequisitionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_lines(&self, requisition_id: &str) -> Result<Vec<LineItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_ref, quantity, unit_price, total_override
             FROM requisition_line
             WHERE requisition_id = ?
             ORDER BY position ASC",
        )
        .bind(requisition_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(line_from_row).collect()
    }
}

#[async_trait::async_trait]
impl RequisitionRepository for SqlRequisitionRepository {
    async fn find_by_id(
        &self,
        id: &RequisitionId,
    ) -> Result<Option<Requisition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, requester_id, status, cost_center, note, submitted_at,
                    decided_at, decided_by, rejection_reason, closed_at, created_at, updated_at
             FROM requisition WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = self.load_lines(&id.0).await?;
        Ok(Some(requisition_from_row(row, lines)?))
    }

    async fn save(&self, requisition: Requisition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO requisition (id, requester_id, status, cost_center, note, submitted_at,
                                      decided_at, decided_by, rejection_reason, closed_at,
                                      created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 note = excluded.note,
                 decided_at = excluded.decided_at,
                 decided_by = excluded.decided_by,
                 rejection_reason = excluded.rejection_reason,
                 closed_at = excluded.closed_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&requisition.id.0)
        .bind(&requisition.requester_id.0)
        .bind(requisition.status.as_str())
        .bind(&requisition.cost_center.0)
        .bind(requisition.note.as_deref())
        .bind(requisition.submitted_at.to_rfc3339())
        .bind(requisition.decided_at.map(|value| value.to_rfc3339()))
        .bind(requisition.decided_by.as_ref().map(|id| id.0.as_str()))
        .bind(requisition.rejection_reason.as_deref())
        .bind(requisition.closed_at.map(|value| value.to_rfc3339()))
        .bind(requisition.created_at.to_rfc3339())
        .bind(requisition.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM requisition_line WHERE requisition_id = ?")
            .bind(&requisition.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, line) in requisition.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO requisition_line (requisition_id, position, product_ref, quantity,
                                               unit_price, total_override)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&requisition.id.0)
            .bind(position as i64)
            .bind(&line.product_ref.0)
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.to_string())
            .bind(line.total_override.map(|value| value.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: RequisitionStatus,
        limit: u32,
    ) -> Result<Vec<Requisition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, requester_id, status, cost_center, note, submitted_at,
                    decided_at, decided_by, rejection_reason, closed_at, created_at, updated_at
             FROM requisition
             WHERE status = ?
             ORDER BY submitted_at ASC
             LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut requisitions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let lines = self.load_lines(&id).await?;
            requisitions.push(requisition_from_row(row, lines)?);
        }

        Ok(requisitions)
    }
}

fn requisition_from_row(
    row: SqliteRow,
    lines: Vec<LineItem>,
) -> Result<Requisition, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = RequisitionStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown requisition status `{status_raw}`"))
    })?;

    Ok(Requisition {
        id: RequisitionId(row.try_get("id")?),
        requester_id: EmployeeId(row.try_get("requester_id")?),
        status,
        cost_center: CostCenter(row.try_get("cost_center")?),
        note: row.try_get("note")?,
        lines,
        submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        decided_at: parse_optional_timestamp("decided_at", row.try_get("decided_at")?)?,
        decided_by: row.try_get::<Option<String>, _>("decided_by")?.map(EmployeeId),
        rejection_reason: row.try_get("rejection_reason")?,
        closed_at: parse_optional_timestamp("closed_at", row.try_get("closed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn line_from_row(row: SqliteRow) -> Result<LineItem, RepositoryError> {
    Ok(LineItem {
        product_ref: ProductRef(row.try_get("product_ref")?),
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        total_override: row
            .try_get::<Option<String>, _>("total_override")?
            .map(|value| parse_decimal("total_override", value))
            .transpose()?,
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use reqflow_core::domain::org::{CostCenter, EmployeeId};
    use reqflow_core::domain::requisition::{
        LineItem, ProductRef, Requisition, RequisitionId, RequisitionStatus,
    };

    use super::SqlRequisitionRepository;
    use crate::repositories::RequisitionRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn sample(id: &str) -> Requisition {
        let submitted = parse_ts("2026-03-02T09:00:00Z");
        Requisition {
            id: RequisitionId(id.to_string()),
            requester_id: EmployeeId("U1".to_string()),
            status: RequisitionStatus::Pending,
            cost_center: CostCenter("CC1".to_string()),
            note: Some("quarterly restock".to_string()),
            lines: vec![
                LineItem {
                    product_ref: ProductRef("paper-a4".to_string()),
                    quantity: 10,
                    unit_price: Decimal::new(450, 2),
                    total_override: None,
                },
                LineItem {
                    product_ref: ProductRef("toner-bk".to_string()),
                    quantity: 2,
                    unit_price: Decimal::new(5999, 2),
                    total_override: Some(Decimal::new(11000, 2)),
                },
            ],
            submitted_at: submitted,
            decided_at: None,
            decided_by: None,
            rejection_reason: None,
            closed_at: None,
            created_at: submitted,
            updated_at: submitted,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_lines_in_order() {
        let pool = setup().await;
        let repo = SqlRequisitionRepository::new(pool.clone());

        let requisition = sample("R-100");
        repo.save(requisition.clone()).await.expect("save");

        let found = repo
            .find_by_id(&RequisitionId("R-100".to_string()))
            .await
            .expect("find")
            .expect("should exist");

        assert_eq!(found, requisition);
        assert_eq!(found.lines[0].product_ref.0, "paper-a4");
        assert_eq!(found.lines[1].total_override, Some(Decimal::new(11000, 2)));

        pool.close().await;
    }

    #[tokio::test]
    async fn save_upserts_status_and_decision_fields() {
        let pool = setup().await;
        let repo = SqlRequisitionRepository::new(pool.clone());

        let mut requisition = sample("R-101");
        repo.save(requisition.clone()).await.expect("save");

        requisition.status = RequisitionStatus::Rejected;
        requisition.decided_at = Some(parse_ts("2026-03-02T10:00:00Z"));
        requisition.decided_by = Some(EmployeeId("M1".to_string()));
        requisition.rejection_reason = Some("budget exceeded".to_string());
        requisition.updated_at = parse_ts("2026-03-02T10:00:00Z");
        repo.save(requisition.clone()).await.expect("upsert");

        let found = repo
            .find_by_id(&RequisitionId("R-101".to_string()))
            .await
            .expect("find")
            .expect("should exist");

        assert_eq!(found.status, RequisitionStatus::Rejected);
        assert_eq!(found.rejection_reason.as_deref(), Some("budget exceeded"));
        assert_eq!(found.decided_by, Some(EmployeeId("M1".to_string())));

        pool.close().await;
    }

    #[tokio::test]
    async fn list_by_status_filters_and_orders_by_submission() {
        let pool = setup().await;
        let repo = SqlRequisitionRepository::new(pool.clone());

        let mut first = sample("R-1");
        first.submitted_at = parse_ts("2026-03-01T08:00:00Z");
        let mut second = sample("R-2");
        second.submitted_at = parse_ts("2026-03-02T08:00:00Z");
        let mut decided = sample("R-3");
        decided.status = RequisitionStatus::Approved;

        repo.save(second).await.expect("save second");
        repo.save(first).await.expect("save first");
        repo.save(decided).await.expect("save decided");

        let pending =
            repo.list_by_status(RequisitionStatus::Pending, 10).await.expect("list pending");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id.0, "R-1");
        assert_eq!(pending[1].id.0, "R-2");

        pool.close().await;
    }
}
