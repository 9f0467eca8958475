pub mod hub;
pub mod redact;
pub mod sink;

pub use hub::LogHub;
pub use redact::Redactor;
pub use sink::LogSink;
