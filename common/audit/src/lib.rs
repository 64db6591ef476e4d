pub mod model;
pub mod sink;

pub use model::AuditEntry;
pub use sink::AuditSink;
