use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use reqflow_core::domain::notification::{
    DeliveryStatus, NotificationId, NotificationKind, NotificationRecord, Priority,
};
use reqflow_core::domain::org::EmployeeId;

use super::requisition::{parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{NotificationLedger, RepositoryError};
use crate::DbPool;

pub struct SqlNotificationLedger {
    pool: DbPool,
}

impl SqlNotificationLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, recipient_id, recipient_email, subject, body, kind, priority,
     status, retry_count, last_error, provider_message_id, read, created_at, sent_at, updated_at";

fn record_from_row(row: SqliteRow) -> Result<NotificationRecord, RepositoryError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = NotificationKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown notification kind `{kind_raw}`")))?;

    let priority_raw: String = row.try_get("priority")?;
    let priority = Priority::parse(&priority_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown notification priority `{priority_raw}`"))
    })?;

    let status_raw: String = row.try_get("status")?;
    let status = DeliveryStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown delivery status `{status_raw}`"))
    })?;

    Ok(NotificationRecord {
        id: NotificationId(row.try_get("id")?),
        recipient_id: EmployeeId(row.try_get("recipient_id")?),
        recipient_email: row.try_get("recipient_email")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        kind,
        priority,
        status,
        retry_count: parse_u32("retry_count", row.try_get("retry_count")?)?,
        last_error: row.try_get("last_error")?,
        provider_message_id: row.try_get("provider_message_id")?,
        read: row.try_get::<i64, _>("read")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl NotificationLedger for SqlNotificationLedger {
    async fn create(&self, record: NotificationRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO notification_ledger (id, recipient_id, recipient_email, subject, body,
                                              kind, priority, status, retry_count, last_error,
                                              provider_message_id, read, created_at, sent_at,
                                              updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.recipient_id.0)
        .bind(record.recipient_email.as_deref())
        .bind(&record.subject)
        .bind(&record.body)
        .bind(record.kind.as_str())
        .bind(record.priority.as_str())
        .bind(record.status.as_str())
        .bind(i64::from(record.retry_count))
        .bind(record.last_error.as_deref())
        .bind(record.provider_message_id.as_deref())
        .bind(i64::from(record.read))
        .bind(record.created_at.to_rfc3339())
        .bind(record.sent_at.map(|value| value.to_rfc3339()))
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &NotificationId,
    ) -> Result<Option<NotificationRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM notification_ledger WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn mark_sent(
        &self,
        id: &NotificationId,
        provider_message_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();

        // Guarded so a row that is already sent stays untouched (idempotent).
        sqlx::query(
            "UPDATE notification_ledger
             SET status = 'sent', provider_message_id = ?, sent_at = ?, updated_at = ?
             WHERE id = ? AND status != 'sent'",
        )
        .bind(provider_message_id)
        .bind(&now)
        .bind(&now)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &NotificationId,
        error_detail: &str,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE notification_ledger
             SET status = 'failed', retry_count = retry_count + 1, last_error = ?, updated_at = ?
             WHERE id = ? AND status != 'sent'",
        )
        .bind(error_detail)
        .bind(&now)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_for_retry(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE notification_ledger
             SET status = 'pending', updated_at = ?
             WHERE id = ? AND status = 'failed'",
        )
        .bind(&now)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn query_failed_retryable(
        &self,
        max_retries: u32,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM notification_ledger
             WHERE status = 'failed' AND retry_count < ?
             ORDER BY created_at ASC"
        ))
        .bind(i64::from(max_retries))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn query_for_recipient(
        &self,
        recipient_id: &EmployeeId,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM notification_ledger
             WHERE recipient_id = ?
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(&recipient_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE notification_ledger SET read = 1, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
