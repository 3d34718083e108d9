use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::org::{CostCenter, EmployeeId};
use crate::domain::requisition::{LineItem, Requisition, RequisitionId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequisitionCreated,
    RequisitionApproved,
    RequisitionRejected,
    RequisitionPending,
    NoManagerFound,
    Arrival,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequisitionCreated => "requisition_created",
            Self::RequisitionApproved => "requisition_approved",
            Self::RequisitionRejected => "requisition_rejected",
            Self::RequisitionPending => "requisition_pending",
            Self::NoManagerFound => "no_manager_found",
            Self::Arrival => "arrival",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "requisition_created" => Some(Self::RequisitionCreated),
            "requisition_approved" => Some(Self::RequisitionApproved),
            "requisition_rejected" => Some(Self::RequisitionRejected),
            "requisition_pending" => Some(Self::RequisitionPending),
            "no_manager_found" => Some(Self::NoManagerFound),
            "arrival" => Some(Self::Arrival),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One durable record of a single notification's delivery attempt/outcome.
/// Never deleted; the ledger is the audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub recipient_id: EmployeeId,
    /// `None` means in-app delivery only; no email attempt is made.
    pub recipient_email: Option<String>,
    pub subject: String,
    pub body: String,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of a line item carried inside an event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineDigest {
    pub product_ref: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<&LineItem> for LineDigest {
    fn from(line: &LineItem) -> Self {
        Self {
            product_ref: line.product_ref.0.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total(),
        }
    }
}

/// Snapshot of the requisition carried inside an event payload. Timestamps
/// embedded in rendered bodies are taken from here, never from wall-clock
/// time at render time, so a retried send renders byte-identical content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequisitionDigest {
    pub id: RequisitionId,
    pub requester_id: EmployeeId,
    pub requester_name: String,
    pub cost_center: CostCenter,
    pub total_amount: Decimal,
    pub note: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub lines: Vec<LineDigest>,
}

impl RequisitionDigest {
    pub fn from_requisition(requisition: &Requisition, requester_name: &str) -> Self {
        Self {
            id: requisition.id.clone(),
            requester_id: requisition.requester_id.clone(),
            requester_name: requester_name.to_string(),
            cost_center: requisition.cost_center.clone(),
            total_amount: requisition.total_amount(),
            note: requisition.note.clone(),
            submitted_at: requisition.submitted_at,
            lines: requisition.lines.iter().map(LineDigest::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: EmployeeId,
    pub display_name: String,
}

/// A workflow event handed to the dispatch engine. One variant per kind with
/// a typed payload; constructed in memory per transition and never persisted
/// as its own entity (only resulting ledger rows persist).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NotificationEvent {
    Created {
        requisition: RequisitionDigest,
    },
    Approved {
        requisition: RequisitionDigest,
        actor: Actor,
        decided_at: DateTime<Utc>,
        is_self_approval: bool,
    },
    Rejected {
        requisition: RequisitionDigest,
        actor: Actor,
        reason: String,
        decided_at: DateTime<Utc>,
    },
    Arrival {
        requisition: RequisitionDigest,
        closed_at: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Created { .. } => NotificationKind::RequisitionCreated,
            Self::Approved { .. } => NotificationKind::RequisitionApproved,
            Self::Rejected { .. } => NotificationKind::RequisitionRejected,
            Self::Arrival { .. } => NotificationKind::Arrival,
        }
    }

    pub fn requisition(&self) -> &RequisitionDigest {
        match self {
            Self::Created { requisition }
            | Self::Approved { requisition, .. }
            | Self::Rejected { requisition, .. }
            | Self::Arrival { requisition, .. } => requisition,
        }
    }
}
