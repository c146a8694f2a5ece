//! Transaction state machine and event loop of the MMS mediator.
//!
//! The [`Mediator`] runs one cooperative event loop per modem. It
//! ingests operator pushes, drives each inbound transaction through
//! download, forward and acknowledgement, serializes outbound
//! submissions, and reconciles stored transactions at startup. The
//! [`TransactionRegistry`] coalesces repeated operator pushes of the
//! same Transaction-Id onto a single user-visible artifact.

mod inbound;
mod mediator;
mod outbound;
mod reconcile;
mod registry;

pub use mediator::{Mediator, MediatorConfig, MediatorHandle, SendFileRequest};
pub use registry::TransactionRegistry;
