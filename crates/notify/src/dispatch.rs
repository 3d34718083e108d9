use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use reqflow_core::domain::notification::{
    DeliveryStatus, NotificationEvent, NotificationId, NotificationKind, NotificationRecord,
    Priority,
};
use reqflow_core::domain::org::EmployeeId;
use reqflow_db::repositories::{NotificationLedger, RepositoryError};

use crate::channel::DeliveryChannel;
use crate::resolver::{ManagerResolution, RecipientResolver, ResolveError};
use crate::template::TemplateRenderer;
use crate::transport::OutboundEmail;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("ledger failure: {0}")]
    Ledger(#[from] RepositoryError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub created: usize,
    pub sent: usize,
    pub failed: usize,
}

struct PlannedRecipient {
    recipient_id: EmployeeId,
    email: Option<String>,
    kind: NotificationKind,
    priority: Priority,
}

/// Orchestrates one workflow event into ledger rows and delivery attempts.
///
/// Recipients are planned first, so a resolution failure creates no rows at
/// all. Every planned recipient then gets its `Pending` ledger row before
/// any delivery attempt, and the per-recipient attempts run concurrently:
/// one slow mail path must not delay the other recipients. Callers invoke
/// dispatch at most once per workflow transition.
pub struct DispatchEngine {
    resolver: RecipientResolver,
    renderer: TemplateRenderer,
    channel: Arc<DeliveryChannel>,
    ledger: Arc<dyn NotificationLedger>,
}

impl DispatchEngine {
    pub fn new(
        resolver: RecipientResolver,
        renderer: TemplateRenderer,
        channel: Arc<DeliveryChannel>,
        ledger: Arc<dyn NotificationLedger>,
    ) -> Self {
        Self { resolver, renderer, channel, ledger }
    }

    pub async fn dispatch(
        &self,
        event: &NotificationEvent,
    ) -> Result<DispatchReport, DispatchError> {
        let planned = self.plan_recipients(event).await?;
        let mut report = DispatchReport { created: 0, sent: 0, failed: 0 };
        let mut deliveries: Vec<(NotificationId, OutboundEmail)> = Vec::new();

        for recipient in &planned {
            let rendered = self.renderer.render(recipient.kind, event);
            let now = Utc::now();
            let row_id = NotificationId(Uuid::new_v4().to_string());

            self.ledger
                .create(NotificationRecord {
                    id: row_id.clone(),
                    recipient_id: recipient.recipient_id.clone(),
                    recipient_email: recipient.email.clone(),
                    subject: rendered.subject.clone(),
                    body: rendered.body.clone(),
                    kind: recipient.kind,
                    priority: recipient.priority,
                    status: DeliveryStatus::Pending,
                    retry_count: 0,
                    last_error: None,
                    provider_message_id: None,
                    read: false,
                    created_at: now,
                    sent_at: None,
                    updated_at: now,
                })
                .await?;
            report.created += 1;

            match &recipient.email {
                Some(email) => deliveries.push((
                    row_id,
                    OutboundEmail {
                        to: email.clone(),
                        subject: rendered.subject,
                        body: rendered.body,
                    },
                )),
                None => {
                    // In-app-only delivery is a valid terminal state, not a
                    // failure; no email attempt is made.
                    self.ledger.mark_sent(&row_id, None).await?;
                    report.sent += 1;
                }
            }
        }

        let mut attempts = JoinSet::new();
        for (row_id, outbound) in deliveries {
            let channel = Arc::clone(&self.channel);
            let ledger = Arc::clone(&self.ledger);
            attempts.spawn(async move {
                match channel.send(&outbound).await {
                    Ok(receipt) => {
                        if let Err(error) =
                            ledger.mark_sent(&row_id, receipt.message_id.as_deref()).await
                        {
                            warn!(
                                row_id = %row_id.0,
                                error = %error,
                                "delivered notification could not be marked sent"
                            );
                        }
                        true
                    }
                    Err(delivery_error) => {
                        if let Err(error) =
                            ledger.mark_failed(&row_id, &delivery_error.to_string()).await
                        {
                            warn!(
                                row_id = %row_id.0,
                                error = %error,
                                "failed notification could not be marked failed"
                            );
                        }
                        false
                    }
                }
            });
        }

        while let Some(outcome) = attempts.join_next().await {
            match outcome {
                Ok(true) => report.sent += 1,
                Ok(false) => report.failed += 1,
                Err(join_error) => {
                    warn!(error = %join_error, "delivery task aborted");
                    report.failed += 1;
                }
            }
        }

        info!(
            event_name = "notify.dispatch.completed",
            kind = event.kind().as_str(),
            requisition_id = %event.requisition().id.0,
            created = report.created,
            sent = report.sent,
            failed = report.failed,
            "dispatched workflow event"
        );

        Ok(report)
    }

    async fn plan_recipients(
        &self,
        event: &NotificationEvent,
    ) -> Result<Vec<PlannedRecipient>, DispatchError> {
        let requisition = event.requisition();
        let requester = requisition.requester_id.clone();
        let mut planned = Vec::new();

        match event {
            NotificationEvent::Created { .. } => {
                planned.push(PlannedRecipient {
                    recipient_id: requester.clone(),
                    email: None,
                    kind: NotificationKind::RequisitionCreated,
                    priority: Priority::Normal,
                });

                match self.resolver.managers_for_employee(&requester).await? {
                    ManagerResolution::Managers(managers) => {
                        let requester_has_authority =
                            self.resolver.has_approval_authority(&requester).await?;
                        for manager in managers {
                            // A manager never gets asked to approve their own
                            // submission; self-approval covers it.
                            if requester_has_authority && manager.id == requester {
                                continue;
                            }
                            planned.push(PlannedRecipient {
                                recipient_id: manager.id,
                                email: Some(manager.email),
                                kind: NotificationKind::RequisitionPending,
                                priority: Priority::Normal,
                            });
                        }
                    }
                    ManagerResolution::NoneAvailable => {
                        warn!(
                            event_name = "notify.dispatch.no_manager_escalation",
                            requisition_id = %requisition.id.0,
                            cost_center = %requisition.cost_center.0,
                            "no manager resolved; escalating to admins"
                        );
                        for admin in self.resolver.admins().await? {
                            planned.push(PlannedRecipient {
                                recipient_id: admin.id,
                                email: Some(admin.email),
                                kind: NotificationKind::NoManagerFound,
                                priority: Priority::High,
                            });
                        }
                    }
                }
            }
            NotificationEvent::Approved { is_self_approval, .. } => {
                if !is_self_approval {
                    planned.push(PlannedRecipient {
                        recipient_id: requester.clone(),
                        email: None,
                        kind: NotificationKind::RequisitionApproved,
                        priority: Priority::Normal,
                    });
                }
                for admin in self.resolver.admins().await? {
                    planned.push(PlannedRecipient {
                        recipient_id: admin.id,
                        email: Some(admin.email),
                        kind: NotificationKind::RequisitionApproved,
                        priority: Priority::Normal,
                    });
                }
            }
            NotificationEvent::Rejected { .. } => {
                planned.push(PlannedRecipient {
                    recipient_id: requester.clone(),
                    email: None,
                    kind: NotificationKind::RequisitionRejected,
                    priority: Priority::Normal,
                });
                for admin in self.resolver.admins().await? {
                    planned.push(PlannedRecipient {
                        recipient_id: admin.id,
                        email: Some(admin.email),
                        kind: NotificationKind::RequisitionRejected,
                        priority: Priority::Normal,
                    });
                }
            }
            NotificationEvent::Arrival { .. } => {
                planned.push(PlannedRecipient {
                    recipient_id: requester.clone(),
                    email: None,
                    kind: NotificationKind::Arrival,
                    priority: Priority::Normal,
                });
            }
        }

        Ok(planned)
    }
}
