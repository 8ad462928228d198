mod coordinator;

pub use coordinator::{AuditSpec, CoordinatorSpec, RoniSpec};
