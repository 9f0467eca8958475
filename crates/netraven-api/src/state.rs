use std::sync::Arc;

use netraven_dispatcher::{Dispatcher, HandlerRegistry};
use netraven_logging::LogHub;
use netraven_store::JobStore;
use tokio::sync::mpsc;

use netraven_dispatcher::SchedulerCommand;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub handler_registry: Arc<HandlerRegistry>,
    pub log_hub: Arc<LogHub>,
    pub scheduler_commands: mpsc::Sender<SchedulerCommand>,
    pub auth_token: Arc<String>,
}
