use crate::Commands;
use devstack_core::{Engine, Result};

pub mod pipeline;
pub mod services;
pub mod status;

/// Run one CLI command against a discovered project
pub async fn dispatch(engine: &mut Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Run { module, pipeline } => pipeline::run(engine, &module, &pipeline).await,
        Commands::Task { module, task } => pipeline::task(engine, &module, &task).await,
        Commands::Migrate { module, list } => pipeline::migrate(engine, &module, list).await,
        Commands::State { module } => pipeline::state(engine, &module),
        Commands::Reset { module } => pipeline::reset(engine, &module),
        Commands::Start { module, service } => {
            services::start(engine, &module, service.as_deref()).await
        }
        Commands::Stop { module, service } => {
            services::stop(engine, &module, service.as_deref()).await
        }
        Commands::Restart { module, service } => services::restart(engine, &module, &service).await,
        Commands::Status { module, json } => status::run(engine, module.as_deref(), json).await,
    }
}
