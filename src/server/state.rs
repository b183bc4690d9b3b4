use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::conversion::{ConversionPipeline, OfficeStrategy};

use super::ServerConfig;

pub type GuardedPipeline = Arc<ConversionPipeline>;
/// Probed by the health endpoint, whether or not the office strategy is enabled.
pub type GuardedOfficeLocator = Arc<OfficeStrategy>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub pipeline: GuardedPipeline,
    pub office_locator: GuardedOfficeLocator,
}

impl FromRef<ServerState> for GuardedPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.pipeline.clone()
    }
}

impl FromRef<ServerState> for GuardedOfficeLocator {
    fn from_ref(input: &ServerState) -> Self {
        input.office_locator.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
