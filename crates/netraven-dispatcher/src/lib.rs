pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod scheduler;

pub use credentials::{CredentialCandidate, CredentialResolver};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, HandlerError};
pub use handlers::{BackupHandler, HandlerContext, HandlerMetadata, HandlerRegistry, JobHandler, ReachabilityHandler};
pub use scheduler::{Scheduler, SchedulerCommand};
