pub mod notification;
pub mod org;
pub mod requisition;
