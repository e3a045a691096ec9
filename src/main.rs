use std::panic;
use std::sync::Arc;

use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::orchestrator::Orchestrator;
use crate::grpc::models::grading_service_server::GradingServiceServer;
use crate::grpc::services::GradingServiceImpl;
use crate::native::{
    materializer::FsMaterializer, mocha::MochaAdapter, reclaimer::LsofPortReclaimer,
    registry::FsExerciseRegistry, supervisor::NativeSupervisor,
};

mod config;
mod constants;
mod core;
mod grpc;
mod native;


#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let orchestrator = Orchestrator::new(
        Arc::new(FsExerciseRegistry::new(&config.exercises_dir)?),
        Arc::new(LsofPortReclaimer::new()),
        Arc::new(FsMaterializer::new()),
        Arc::new(NativeSupervisor::new(&config.interpreter)),
        Arc::new(MochaAdapter::new(config.test_command.clone())),
        config.timeouts.clone(),
    );
    let service = GradingServiceServer::new(GradingServiceImpl::new(Arc::new(orchestrator)));

    tracing::info!(addr = %config.listen_addr, "gRPC server listening");
    Server::builder()
        .add_service(service)
        .serve(config.listen_addr)
        .await?;

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
