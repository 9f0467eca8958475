pub mod driver;
pub mod error;
pub mod generic;
pub mod probe;
pub mod registry;
pub mod scripted;

pub use driver::{Driver, ReachabilityProbe, Session, SessionConfig};
pub use error::SessionError;
pub use generic::GenericLineDriver;
pub use registry::DriverRegistry;
pub use scripted::{OpenOutcome, ScriptedDriver};
