pub mod config;
pub mod domain;
pub mod errors;

pub use chrono;
pub use rust_decimal;

pub use domain::notification::{
    Actor, DeliveryStatus, LineDigest, NotificationEvent, NotificationId, NotificationKind,
    NotificationRecord, Priority, RequisitionDigest,
};
pub use domain::org::{CostCenter, EmployeeId, OrgEmployee, OrgManager, OrgRole};
pub use domain::requisition::{
    LineItem, ProductRef, Requisition, RequisitionId, RequisitionStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
