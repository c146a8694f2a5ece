//! Per-account messaging surface.
//!
//! One [`MmsService`] facade exists per account identity. It owns the
//! live [`MessageSurface`] objects, broadcasts add/remove/property
//! signals through the bus adapter, and routes user-initiated delete
//! and redownload requests back into the pipeline through watcher
//! tasks. The [`ServiceManager`] tracks facades across SIM events.

mod manager;
mod properties;
mod service;
mod surface;

pub use manager::ServiceManager;
pub use properties::{format_date, parse_message, strip_plmn};
pub use service::{MmsService, OutAttachment, OutgoingRequest, ServiceHandle};
pub use surface::MessageSurface;
