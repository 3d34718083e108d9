use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use reqflow_core::domain::notification::{
    DeliveryStatus, NotificationId, NotificationRecord,
};
use reqflow_core::domain::org::{CostCenter, EmployeeId, OrgEmployee, OrgManager, OrgRole};
use reqflow_core::domain::requisition::{Requisition, RequisitionId, RequisitionStatus};

use super::{
    NotificationLedger, OrgDirectory, RepositoryError, RequisitionRepository,
};

#[derive(Default)]
pub struct InMemoryRequisitionRepository {
    requisitions: RwLock<HashMap<String, Requisition>>,
}

#[async_trait::async_trait]
impl RequisitionRepository for InMemoryRequisitionRepository {
    async fn find_by_id(
        &self,
        id: &RequisitionId,
    ) -> Result<Option<Requisition>, RepositoryError> {
        let requisitions = self.requisitions.read().await;
        Ok(requisitions.get(&id.0).cloned())
    }

    async fn save(&self, requisition: Requisition) -> Result<(), RepositoryError> {
        let mut requisitions = self.requisitions.write().await;
        requisitions.insert(requisition.id.0.clone(), requisition);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: RequisitionStatus,
        limit: u32,
    ) -> Result<Vec<Requisition>, RepositoryError> {
        let requisitions = self.requisitions.read().await;
        let mut matching: Vec<Requisition> =
            requisitions.values().filter(|row| row.status == status).cloned().collect();
        matching.sort_by_key(|row| row.submitted_at);
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

/// Directory fake seeded with employee and manager records. Each
/// `fail_next_lookup` call queues one storage error for an upcoming lookup,
/// for tests that assert the NotFound-vs-failure distinction.
#[derive(Default)]
pub struct InMemoryOrgDirectory {
    employees: RwLock<Vec<OrgEmployee>>,
    managers: RwLock<Vec<OrgManager>>,
    queued_failures: RwLock<u32>,
}

impl InMemoryOrgDirectory {
    pub async fn add_employee(&self, id: &str, cost_center: &str, display_name: &str) {
        self.employees.write().await.push(OrgEmployee {
            id: EmployeeId(id.to_string()),
            cost_center: CostCenter(cost_center.to_string()),
            display_name: display_name.to_string(),
        });
    }

    pub async fn add_manager(&self, id: &str, cost_center: &str, email: &str, role: OrgRole) {
        self.managers.write().await.push(OrgManager {
            id: EmployeeId(id.to_string()),
            cost_center: CostCenter(cost_center.to_string()),
            email: email.to_string(),
            display_name: id.to_string(),
            role,
        });
    }

    pub async fn fail_next_lookup(&self) {
        *self.queued_failures.write().await += 1;
    }

    async fn check_failure(&self) -> Result<(), RepositoryError> {
        let mut queued = self.queued_failures.write().await;
        if *queued > 0 {
            *queued -= 1;
            return Err(RepositoryError::Decode("directory storage unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrgDirectory for InMemoryOrgDirectory {
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<OrgEmployee>, RepositoryError> {
        self.check_failure().await?;
        let employees = self.employees.read().await;
        Ok(employees.iter().find(|employee| &employee.id == employee_id).cloned())
    }

    async fn cost_center_of(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<CostCenter>, RepositoryError> {
        self.check_failure().await?;
        let employees = self.employees.read().await;
        Ok(employees
            .iter()
            .find(|employee| &employee.id == employee_id)
            .map(|employee| employee.cost_center.clone()))
    }

    async fn managers_of(
        &self,
        cost_center: &CostCenter,
    ) -> Result<Vec<OrgManager>, RepositoryError> {
        self.check_failure().await?;
        let managers = self.managers.read().await;
        Ok(managers
            .iter()
            .filter(|manager| {
                &manager.cost_center == cost_center && manager.role == OrgRole::Manager
            })
            .cloned()
            .collect())
    }

    async fn is_manager(&self, employee_id: &EmployeeId) -> Result<bool, RepositoryError> {
        self.check_failure().await?;
        let managers = self.managers.read().await;
        Ok(managers.iter().any(|manager| &manager.id == employee_id))
    }

    async fn admins(&self) -> Result<Vec<OrgManager>, RepositoryError> {
        self.check_failure().await?;
        let managers = self.managers.read().await;
        Ok(managers.iter().filter(|manager| manager.role == OrgRole::Admin).cloned().collect())
    }
}

/// Ledger fake with the same transition guards as the SQL implementation.
#[derive(Default)]
pub struct InMemoryNotificationLedger {
    records: RwLock<Vec<NotificationRecord>>,
}

impl InMemoryNotificationLedger {
    pub async fn records(&self) -> Vec<NotificationRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationLedger for InMemoryNotificationLedger {
    async fn create(&self, record: NotificationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &NotificationId,
    ) -> Result<Option<NotificationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|record| &record.id == id).cloned())
    }

    async fn mark_sent(
        &self,
        id: &NotificationId,
        provider_message_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|record| &record.id == id) {
            if record.status != DeliveryStatus::Sent {
                record.status = DeliveryStatus::Sent;
                record.provider_message_id = provider_message_id.map(str::to_string);
                record.sent_at = Some(Utc::now());
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &NotificationId,
        error_detail: &str,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|record| &record.id == id) {
            if record.status != DeliveryStatus::Sent {
                record.status = DeliveryStatus::Failed;
                record.retry_count += 1;
                record.last_error = Some(error_detail.to_string());
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn claim_for_retry(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|record| &record.id == id) {
            if record.status == DeliveryStatus::Failed {
                record.status = DeliveryStatus::Pending;
                record.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn query_failed_retryable(
        &self,
        max_retries: u32,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<NotificationRecord> = records
            .iter()
            .filter(|record| {
                record.status == DeliveryStatus::Failed && record.retry_count < max_retries
            })
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.created_at);
        Ok(matching)
    }

    async fn query_for_recipient(
        &self,
        recipient_id: &EmployeeId,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<NotificationRecord> = records
            .iter()
            .filter(|record| &record.recipient_id == recipient_id)
            .cloned()
            .collect();
        matching.sort_by_key(|record| std::cmp::Reverse(record.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|record| &record.id == id) {
            record.read = true;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use reqflow_core::domain::notification::{
        DeliveryStatus, NotificationId, NotificationKind, NotificationRecord, Priority,
    };
    use reqflow_core::domain::org::{EmployeeId, OrgRole};

    use crate::repositories::{
        InMemoryNotificationLedger, InMemoryOrgDirectory, NotificationLedger, OrgDirectory,
        RepositoryError,
    };

    fn record(id: &str) -> NotificationRecord {
        let now = Utc::now();
        NotificationRecord {
            id: NotificationId(id.to_string()),
            recipient_id: EmployeeId("M1".to_string()),
            recipient_email: Some("m1@example.test".to_string()),
            subject: "subject".to_string(),
            body: "body".to_string(),
            kind: NotificationKind::RequisitionPending,
            priority: Priority::Normal,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            last_error: None,
            provider_message_id: None,
            read: false,
            created_at: now,
            sent_at: None,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn in_memory_ledger_mirrors_sql_transition_guards() {
        let ledger = InMemoryNotificationLedger::default();
        let id = NotificationId("N-1".to_string());

        ledger.create(record("N-1")).await.expect("create");
        ledger.mark_failed(&id, "boom").await.expect("fail");
        assert!(ledger.claim_for_retry(&id).await.expect("claim"));
        assert!(!ledger.claim_for_retry(&id).await.expect("second claim"));

        ledger.mark_sent(&id, Some("msg-1")).await.expect("sent");
        ledger.mark_failed(&id, "late").await.expect("late fail");

        let found = ledger.find_by_id(&id).await.expect("find").expect("exists");
        assert_eq!(found.status, DeliveryStatus::Sent);
        assert_eq!(found.retry_count, 1);
    }

    #[tokio::test]
    async fn directory_failure_toggle_surfaces_storage_errors() {
        let directory = InMemoryOrgDirectory::default();
        directory.add_employee("U1", "CC1", "Riley").await;
        directory.add_manager("M1", "CC1", "m1@example.test", OrgRole::Manager).await;

        directory.fail_next_lookup().await;
        let error = directory
            .cost_center_of(&EmployeeId("U1".to_string()))
            .await
            .expect_err("forced failure");
        assert!(matches!(error, RepositoryError::Decode(_)));

        // The failure is one-shot; the next lookup succeeds.
        let found =
            directory.cost_center_of(&EmployeeId("U1".to_string())).await.expect("lookup");
        assert_eq!(found.map(|cc| cc.0), Some("CC1".to_string()));
    }
}
