use async_trait::async_trait;
use thiserror::Error;

use reqflow_core::domain::notification::{NotificationId, NotificationRecord};
use reqflow_core::domain::org::{CostCenter, EmployeeId, OrgEmployee, OrgManager};
use reqflow_core::domain::requisition::{Requisition, RequisitionId, RequisitionStatus};

pub mod memory;
pub mod notification;
pub mod org;
pub mod requisition;

pub use memory::{InMemoryNotificationLedger, InMemoryOrgDirectory, InMemoryRequisitionRepository};
pub use notification::SqlNotificationLedger;
pub use org::SqlOrgDirectory;
pub use requisition::SqlRequisitionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RequisitionRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequisitionId)
        -> Result<Option<Requisition>, RepositoryError>;
    async fn save(&self, requisition: Requisition) -> Result<(), RepositoryError>;
    async fn list_by_status(
        &self,
        status: RequisitionStatus,
        limit: u32,
    ) -> Result<Vec<Requisition>, RepositoryError>;
}

/// Read-only view over the organization reference data. `Ok(None)` from the
/// lookup methods is a normal NotFound outcome; a `RepositoryError` is a
/// storage failure and must never be collapsed into "no manager".
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<OrgEmployee>, RepositoryError>;

    async fn cost_center_of(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<CostCenter>, RepositoryError>;

    /// Managers (role `manager`) overseeing a cost center; possibly empty.
    async fn managers_of(
        &self,
        cost_center: &CostCenter,
    ) -> Result<Vec<OrgManager>, RepositoryError>;

    /// True iff the id appears as any manager record, independent of cost center.
    async fn is_manager(&self, employee_id: &EmployeeId) -> Result<bool, RepositoryError>;

    /// All admin-tagged recipients; global, not cost-center-scoped.
    async fn admins(&self) -> Result<Vec<OrgManager>, RepositoryError>;
}

/// Append-only delivery audit store. Rows transition status but are never
/// deleted, and a `Sent` row is never mutated again.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn create(&self, record: NotificationRecord) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        id: &NotificationId,
    ) -> Result<Option<NotificationRecord>, RepositoryError>;

    /// `Pending|Failed -> Sent`; a no-op when the row is already `Sent`.
    async fn mark_sent(
        &self,
        id: &NotificationId,
        provider_message_id: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// `-> Failed`, incrementing `retry_count` and storing the detail verbatim.
    async fn mark_failed(&self, id: &NotificationId, error_detail: &str)
        -> Result<(), RepositoryError>;

    /// Compare-and-swap claim: `Failed -> Pending` (retrying). Returns false
    /// when the row is not currently `Failed`, so a concurrent sweep sees an
    /// in-flight row as already claimed.
    async fn claim_for_retry(&self, id: &NotificationId) -> Result<bool, RepositoryError>;

    /// `Failed` rows with `retry_count < max_retries`, oldest first.
    async fn query_failed_retryable(
        &self,
        max_retries: u32,
    ) -> Result<Vec<NotificationRecord>, RepositoryError>;

    /// In-app feed for a recipient, newest first.
    async fn query_for_recipient(
        &self,
        recipient_id: &EmployeeId,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, RepositoryError>;

    async fn mark_read(&self, id: &NotificationId) -> Result<(), RepositoryError>;
}
