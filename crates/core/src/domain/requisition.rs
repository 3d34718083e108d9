use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::org::{CostCenter, EmployeeId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequisitionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductRef(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionStatus {
    Pending,
    Approved,
    Rejected,
    Closed,
}

impl RequisitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_ref: ProductRef,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Explicit override for the line total; `None` means quantity x unit price.
    pub total_override: Option<Decimal>,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        match self.total_override {
            Some(total) => total,
            None => Decimal::from(self.quantity) * self.unit_price,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: RequisitionId,
    pub requester_id: EmployeeId,
    pub status: RequisitionStatus,
    pub cost_center: CostCenter,
    pub note: Option<String>,
    pub lines: Vec<LineItem>,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<EmployeeId>,
    pub rejection_reason: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Requisition {
    /// Sum of line totals.
    pub fn total_amount(&self) -> Decimal {
        self.lines.iter().map(LineItem::line_total).sum()
    }

    pub fn can_transition_to(&self, next: &RequisitionStatus) -> bool {
        matches!(
            (&self.status, next),
            (RequisitionStatus::Pending, RequisitionStatus::Approved)
                | (RequisitionStatus::Pending, RequisitionStatus::Rejected)
                | (RequisitionStatus::Approved, RequisitionStatus::Closed)
        )
    }

    pub fn transition_to(&mut self, next: RequisitionStatus) -> Result<(), DomainError> {
        if self.can_transition_to(&next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidTransition { from: self.status.clone(), to: next })
    }
}
