use std::sync::Arc;

use build_pipeline::{BuildConfig, BuildDispatcher, BuildPipeline, StepRunner};
use common::{
    storage::{layout::StorageLayout, registry::JobRegistry},
    utils::config::AppConfig,
};

#[derive(Clone)]
pub struct ApiState {
    pub registry: JobRegistry,
    pub layout: StorageLayout,
    pub config: AppConfig,
    pub dispatcher: BuildDispatcher,
}

impl ApiState {
    /// Wires the registry, storage layout and dispatcher around `runner`.
    pub fn new(config: &AppConfig, runner: Arc<dyn StepRunner>) -> Self {
        let registry = JobRegistry::new();
        let layout = StorageLayout::from_config(config);
        let pipeline = BuildPipeline::new(
            registry.clone(),
            layout.clone(),
            BuildConfig::from_app_config(config),
            runner,
        );
        let dispatcher = BuildDispatcher::new(
            Arc::new(pipeline),
            config.max_concurrent_builds,
            config.max_queued_builds,
        );

        Self {
            registry,
            layout,
            config: config.clone(),
            dispatcher,
        }
    }
}
