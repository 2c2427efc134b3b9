use std::sync::Arc;

use common::storage::FileVault;

use crate::config::AppConfig;
use crate::convert::ConversionTrigger;
use crate::domain::{AccessGate, IterationRegistry, ShareResolver};

#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<dyn FileVault>,
    pub registry: Arc<dyn IterationRegistry>,
    pub gate: Arc<dyn AccessGate>,
    pub shares: Arc<dyn ShareResolver>,
    pub converter: Arc<dyn ConversionTrigger>,
    pub config: Arc<AppConfig>,
}
