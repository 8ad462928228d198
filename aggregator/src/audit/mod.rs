mod auditor;
mod error;
mod record;
mod store;

pub use auditor::RobustnessAuditor;
pub use error::{AuditErr, Result};
pub use record::{RoniEntry, RoniOutcome, RoniRecord};
pub use store::{AuditStore, JsonLinesAuditStore, MemoryAuditStore};
