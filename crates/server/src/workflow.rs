use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use reqflow_core::domain::notification::{Actor, NotificationEvent, RequisitionDigest};
use reqflow_core::domain::org::{CostCenter, EmployeeId};
use reqflow_core::domain::requisition::{
    LineItem, ProductRef, Requisition, RequisitionId, RequisitionStatus,
};
use reqflow_core::errors::DomainError;
use reqflow_db::repositories::{OrgDirectory, RepositoryError, RequisitionRepository};
use reqflow_notify::DispatchEngine;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("requisition `{0}` was not found")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug)]
pub struct NewLine {
    pub product_ref: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_override: Option<Decimal>,
}

#[derive(Clone, Debug)]
pub struct NewRequisition {
    pub requester_id: String,
    pub cost_center: String,
    pub note: Option<String>,
    pub lines: Vec<NewLine>,
}

/// Owns requisition status transitions. Each transition commits the state
/// change through the repository first and then triggers exactly one
/// dispatch event; a notification failure is logged and swallowed, because
/// the requisition record is the workflow's source of truth and the caller
/// must always see their action succeed.
pub struct RequisitionService {
    requisitions: Arc<dyn RequisitionRepository>,
    directory: Arc<dyn OrgDirectory>,
    engine: Arc<DispatchEngine>,
}

impl RequisitionService {
    pub fn new(
        requisitions: Arc<dyn RequisitionRepository>,
        directory: Arc<dyn OrgDirectory>,
        engine: Arc<DispatchEngine>,
    ) -> Self {
        Self { requisitions, directory, engine }
    }

    pub async fn create(&self, new: NewRequisition) -> Result<Requisition, WorkflowError> {
        for line in &new.lines {
            if line.unit_price < Decimal::ZERO {
                return Err(DomainError::InvariantViolation(format!(
                    "negative unit price for `{}`",
                    line.product_ref
                ))
                .into());
            }
            if line.total_override.is_some_and(|total| total < Decimal::ZERO) {
                return Err(DomainError::InvariantViolation(format!(
                    "negative line total for `{}`",
                    line.product_ref
                ))
                .into());
            }
        }

        let now = Utc::now();
        let requisition = Requisition {
            id: RequisitionId(format!("R-{}", Uuid::new_v4())),
            requester_id: EmployeeId(new.requester_id),
            status: RequisitionStatus::Pending,
            cost_center: CostCenter(new.cost_center),
            note: new.note,
            lines: new
                .lines
                .into_iter()
                .map(|line| LineItem {
                    product_ref: ProductRef(line.product_ref),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    total_override: line.total_override,
                })
                .collect(),
            submitted_at: now,
            decided_at: None,
            decided_by: None,
            rejection_reason: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.requisitions.save(requisition.clone()).await?;
        info!(
            event_name = "workflow.requisition.created",
            requisition_id = %requisition.id.0,
            requester_id = %requisition.requester_id.0,
            "requisition created"
        );

        let digest = self.digest_for(&requisition).await;
        self.dispatch_best_effort(NotificationEvent::Created { requisition: digest }).await;

        Ok(requisition)
    }

    pub async fn find(&self, id: &RequisitionId) -> Result<Requisition, WorkflowError> {
        self.requisitions
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.0.clone()))
    }

    pub async fn list(
        &self,
        status: RequisitionStatus,
        limit: u32,
    ) -> Result<Vec<Requisition>, WorkflowError> {
        Ok(self.requisitions.list_by_status(status, limit).await?)
    }

    pub async fn approve(
        &self,
        id: &RequisitionId,
        actor_id: EmployeeId,
    ) -> Result<RequisitionStatus, WorkflowError> {
        let mut requisition = self.find(id).await?;
        requisition.transition_to(RequisitionStatus::Approved)?;

        let decided_at = Utc::now();
        requisition.decided_at = Some(decided_at);
        requisition.decided_by = Some(actor_id.clone());
        requisition.updated_at = decided_at;
        self.requisitions.save(requisition.clone()).await?;

        let is_self_approval = actor_id == requisition.requester_id;
        info!(
            event_name = "workflow.requisition.approved",
            requisition_id = %requisition.id.0,
            actor_id = %actor_id.0,
            is_self_approval,
            "requisition approved"
        );

        let digest = self.digest_for(&requisition).await;
        let actor = self.actor_for(&actor_id).await;
        self.dispatch_best_effort(NotificationEvent::Approved {
            requisition: digest,
            actor,
            decided_at,
            is_self_approval,
        })
        .await;

        Ok(requisition.status)
    }

    pub async fn reject(
        &self,
        id: &RequisitionId,
        actor_id: EmployeeId,
        reason: &str,
    ) -> Result<RequisitionStatus, WorkflowError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::MissingRejectionReason.into());
        }

        let mut requisition = self.find(id).await?;
        requisition.transition_to(RequisitionStatus::Rejected)?;

        let decided_at = Utc::now();
        requisition.decided_at = Some(decided_at);
        requisition.decided_by = Some(actor_id.clone());
        requisition.rejection_reason = Some(reason.to_string());
        requisition.updated_at = decided_at;
        self.requisitions.save(requisition.clone()).await?;

        info!(
            event_name = "workflow.requisition.rejected",
            requisition_id = %requisition.id.0,
            actor_id = %actor_id.0,
            "requisition rejected"
        );

        let digest = self.digest_for(&requisition).await;
        let actor = self.actor_for(&actor_id).await;
        self.dispatch_best_effort(NotificationEvent::Rejected {
            requisition: digest,
            actor,
            reason: reason.to_string(),
            decided_at,
        })
        .await;

        Ok(requisition.status)
    }

    pub async fn mark_arrived(
        &self,
        id: &RequisitionId,
        actor_id: EmployeeId,
    ) -> Result<RequisitionStatus, WorkflowError> {
        let mut requisition = self.find(id).await?;
        requisition.transition_to(RequisitionStatus::Closed)?;

        let closed_at = Utc::now();
        requisition.closed_at = Some(closed_at);
        requisition.updated_at = closed_at;
        self.requisitions.save(requisition.clone()).await?;

        info!(
            event_name = "workflow.requisition.arrived",
            requisition_id = %requisition.id.0,
            actor_id = %actor_id.0,
            "requisition arrived and closed"
        );

        let digest = self.digest_for(&requisition).await;
        self.dispatch_best_effort(NotificationEvent::Arrival { requisition: digest, closed_at })
            .await;

        Ok(requisition.status)
    }

    async fn digest_for(&self, requisition: &Requisition) -> RequisitionDigest {
        let requester_name = match self.directory.find_employee(&requisition.requester_id).await {
            Ok(Some(employee)) => employee.display_name,
            Ok(None) => requisition.requester_id.0.clone(),
            Err(error) => {
                warn!(
                    requester_id = %requisition.requester_id.0,
                    error = %error,
                    "requester name lookup failed; falling back to the identifier"
                );
                requisition.requester_id.0.clone()
            }
        };
        RequisitionDigest::from_requisition(requisition, &requester_name)
    }

    async fn actor_for(&self, actor_id: &EmployeeId) -> Actor {
        let display_name = match self.directory.find_employee(actor_id).await {
            Ok(Some(employee)) => employee.display_name,
            _ => actor_id.0.clone(),
        };
        Actor { id: actor_id.clone(), display_name }
    }

    async fn dispatch_best_effort(&self, event: NotificationEvent) {
        match self.engine.dispatch(&event).await {
            Ok(report) => {
                info!(
                    event_name = "workflow.notify.dispatched",
                    kind = event.kind().as_str(),
                    requisition_id = %event.requisition().id.0,
                    created = report.created,
                    sent = report.sent,
                    failed = report.failed,
                    "notifications dispatched"
                );
            }
            Err(error) => {
                // The state transition is already committed; the ledger and
                // the sweeper are the only places this failure surfaces.
                warn!(
                    event_name = "workflow.notify.failed",
                    kind = event.kind().as_str(),
                    requisition_id = %event.requisition().id.0,
                    error = %error,
                    "notification dispatch failed; requisition state is committed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use reqflow_core::domain::org::{EmployeeId, OrgRole};
    use reqflow_core::domain::requisition::RequisitionStatus;
    use reqflow_db::repositories::{
        InMemoryNotificationLedger, InMemoryOrgDirectory, InMemoryRequisitionRepository,
    };
    use reqflow_notify::{
        DeliveryChannel, DispatchEngine, NoopMailTransport, RecipientResolver, TemplateRenderer,
    };

    use super::{NewLine, NewRequisition, RequisitionService, WorkflowError};

    struct Fixture {
        service: RequisitionService,
        ledger: Arc<InMemoryNotificationLedger>,
        engine_directory: Arc<InMemoryOrgDirectory>,
    }

    async fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryOrgDirectory::default());
        directory.add_employee("U1", "CC1", "Riley Park").await;
        directory.add_employee("M1", "CC1", "Ana Souza").await;
        directory.add_manager("M1", "CC1", "m1@example.test", OrgRole::Manager).await;
        directory.add_manager("M2", "CC1", "m2@example.test", OrgRole::Manager).await;
        directory.add_manager("A1", "HQ", "a1@example.test", OrgRole::Admin).await;

        let ledger = Arc::new(InMemoryNotificationLedger::default());
        let channel = Arc::new(DeliveryChannel::new(
            Arc::new(NoopMailTransport),
            None,
            Duration::from_secs(5),
        ));
        let engine = Arc::new(DispatchEngine::new(
            RecipientResolver::new(directory.clone()),
            TemplateRenderer::new(),
            channel,
            ledger.clone(),
        ));

        let service = RequisitionService::new(
            Arc::new(InMemoryRequisitionRepository::default()),
            directory.clone(),
            engine,
        );

        Fixture { service, ledger, engine_directory: directory }
    }

    fn new_requisition(requester: &str) -> NewRequisition {
        NewRequisition {
            requester_id: requester.to_string(),
            cost_center: "CC1".to_string(),
            note: Some("quarterly restock".to_string()),
            lines: vec![NewLine {
                product_ref: "paper-a4".to_string(),
                quantity: 10,
                unit_price: Decimal::new(450, 2),
                total_override: None,
            }],
        }
    }

    #[tokio::test]
    async fn create_persists_and_fans_out_notifications() {
        let fixture = fixture().await;

        let requisition =
            fixture.service.create(new_requisition("U1")).await.expect("create");

        assert_eq!(requisition.status, RequisitionStatus::Pending);
        assert_eq!(requisition.total_amount(), Decimal::new(4500, 2));

        let found = fixture.service.find(&requisition.id).await.expect("find");
        assert_eq!(found.id, requisition.id);

        // Requester receipt plus two manager rows.
        assert_eq!(fixture.ledger.records().await.len(), 3);
    }

    #[tokio::test]
    async fn approving_twice_is_rejected_and_state_is_kept() {
        let fixture = fixture().await;
        let requisition = fixture.service.create(new_requisition("U1")).await.expect("create");

        let status = fixture
            .service
            .approve(&requisition.id, EmployeeId("M1".to_string()))
            .await
            .expect("first approval");
        assert_eq!(status, RequisitionStatus::Approved);

        let error = fixture
            .service
            .approve(&requisition.id, EmployeeId("M2".to_string()))
            .await
            .expect_err("second approval must fail");
        assert!(matches!(error, WorkflowError::Domain(_)));

        let found = fixture.service.find(&requisition.id).await.expect("find");
        assert_eq!(found.status, RequisitionStatus::Approved);
        assert_eq!(found.decided_by, Some(EmployeeId("M1".to_string())));
    }

    #[tokio::test]
    async fn negative_amounts_are_rejected_at_creation() {
        let fixture = fixture().await;

        let mut new = new_requisition("U1");
        new.lines[0].unit_price = Decimal::new(-450, 2);

        let error = fixture.service.create(new).await.expect_err("negative price must fail");
        assert!(matches!(error, WorkflowError::Domain(_)));
        assert!(fixture.ledger.records().await.is_empty(), "nothing is dispatched");
    }

    #[tokio::test]
    async fn rejection_requires_a_non_empty_reason() {
        let fixture = fixture().await;
        let requisition = fixture.service.create(new_requisition("U1")).await.expect("create");

        let error = fixture
            .service
            .reject(&requisition.id, EmployeeId("M1".to_string()), "   ")
            .await
            .expect_err("blank reason must fail");
        assert!(matches!(error, WorkflowError::Domain(_)));

        let status = fixture
            .service
            .reject(&requisition.id, EmployeeId("M1".to_string()), "budget exceeded")
            .await
            .expect("reject with reason");
        assert_eq!(status, RequisitionStatus::Rejected);

        let found = fixture.service.find(&requisition.id).await.expect("find");
        assert_eq!(found.rejection_reason.as_deref(), Some("budget exceeded"));
    }

    #[tokio::test]
    async fn arrival_is_only_reachable_from_approved() {
        let fixture = fixture().await;
        let requisition = fixture.service.create(new_requisition("U1")).await.expect("create");

        fixture
            .service
            .mark_arrived(&requisition.id, EmployeeId("A1".to_string()))
            .await
            .expect_err("pending requisitions cannot arrive");

        fixture
            .service
            .approve(&requisition.id, EmployeeId("M1".to_string()))
            .await
            .expect("approve");
        let status = fixture
            .service
            .mark_arrived(&requisition.id, EmployeeId("A1".to_string()))
            .await
            .expect("arrive");
        assert_eq!(status, RequisitionStatus::Closed);
    }

    #[tokio::test]
    async fn self_approval_emits_only_admin_audit_rows() {
        let fixture = fixture().await;
        let requisition = fixture.service.create(new_requisition("M1")).await.expect("create");

        let created_rows = fixture.ledger.records().await.len();

        fixture
            .service
            .approve(&requisition.id, EmployeeId("M1".to_string()))
            .await
            .expect("self approval");

        let records = fixture.ledger.records().await;
        let approval_rows: Vec<_> = records.iter().skip(created_rows).collect();

        assert_eq!(approval_rows.len(), 1, "only the A1 audit row");
        assert!(approval_rows.iter().all(|record| record.recipient_id.0 == "A1"));
    }

    #[tokio::test]
    async fn a_dispatch_failure_never_rolls_back_the_transition() {
        let fixture = fixture().await;
        let requisition = fixture.service.create(new_requisition("U1")).await.expect("create");

        // Queue failures for the two display-name lookups and the admin
        // resolution, so the dispatch itself errors out.
        fixture.engine_directory.fail_next_lookup().await;
        fixture.engine_directory.fail_next_lookup().await;
        fixture.engine_directory.fail_next_lookup().await;

        let status = fixture
            .service
            .approve(&requisition.id, EmployeeId("M1".to_string()))
            .await
            .expect("the caller still sees success");
        assert_eq!(status, RequisitionStatus::Approved);

        let found = fixture.service.find(&requisition.id).await.expect("find");
        assert_eq!(found.status, RequisitionStatus::Approved);
    }

    #[tokio::test]
    async fn list_surfaces_pending_work_for_a_status() {
        let fixture = fixture().await;
        fixture.service.create(new_requisition("U1")).await.expect("create");

        let pending = fixture
            .service
            .list(RequisitionStatus::Pending, 10)
            .await
            .expect("list pending");
        assert_eq!(pending.len(), 1);

        let approved = fixture
            .service
            .list(RequisitionStatus::Approved, 10)
            .await
            .expect("list approved");
        assert!(approved.is_empty());
    }

    #[tokio::test]
    async fn unknown_requisition_is_not_found() {
        let fixture = fixture().await;

        let error = fixture
            .service
            .approve(
                &reqflow_core::domain::requisition::RequisitionId("R-missing".to_string()),
                EmployeeId("M1".to_string()),
            )
            .await
            .expect_err("missing requisition");
        assert!(matches!(error, WorkflowError::NotFound(_)));
    }
}
