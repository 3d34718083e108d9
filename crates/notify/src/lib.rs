//! Notification dispatch and delivery assurance.
//!
//! This crate owns everything between a requisition workflow transition and
//! the humans who need to hear about it:
//! - **Resolver** (`resolver`) - employee → cost center → managers, with
//!   admin fallback when resolution comes up empty
//! - **Templates** (`template`) - deterministic Tera rendering per event kind
//! - **Transport** (`transport`) - one-shot mail relay attempts (HTTP relay
//!   or noop), no queueing
//! - **Channel** (`channel`) - primary/fallback transport pair with a hard
//!   per-attempt timeout
//! - **Dispatch** (`dispatch`) - recipient planning, ledger-row creation,
//!   concurrent per-recipient delivery
//! - **Sweeper** (`sweeper`) - bounded, claim-before-send retry of failed
//!   ledger rows
//!
//! # Delivery path
//!
//! ```text
//! Workflow transition → DispatchEngine → plan recipients (resolver)
//!                            ↓
//!                      render (template) → ledger row (PENDING)
//!                            ↓
//!                      DeliveryChannel → SENT | FAILED → RetrySweeper
//! ```
//!
//! Delivery is best-effort relative to the workflow: the requisition record
//! is the source of truth, and notification failures surface only through
//! the ledger and the sweeper.

pub mod channel;
pub mod dispatch;
pub mod resolver;
pub mod sweeper;
pub mod template;
pub mod transport;

pub use channel::{DeliveryChannel, DeliveryError};
pub use dispatch::{DispatchEngine, DispatchError, DispatchReport};
pub use resolver::{ManagerResolution, RecipientResolver, ResolveError};
pub use sweeper::{RetryReport, RetrySweeper};
pub use template::{RenderedMessage, TemplateRenderer};
pub use transport::{
    HttpRelayTransport, MailTransport, NoopMailTransport, OutboundEmail, ProviderReceipt,
    TransportError,
};
