#[macro_use]
extern crate log;

use anyhow::Context;
use clap::Parser;
use ride_common::account::set_chain_id;
use ride_runner::{
    config::{Config, RpcConfig, RunnerConfig, VERSION},
    core::{
        orchestrator::Orchestrator, processor::EventProcessor, requests::RequestRegistry,
        state::ChainState,
    },
    evaluator::RemoteEvaluator,
    node::{rest::RestNodeApi, updates::UpdatesClient, NodeApi},
    rpc::ApiServer,
};
use std::{sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Config::parse();

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    );
    if let Some(filter) = &args.log_level {
        builder.parse_filters(filter);
    }
    builder.init();

    info!("RIDE runner {}", VERSION);
    let config = RunnerConfig::load(&args.config_dir).context("loading configuration")?;
    set_chain_id(config.chain_id as u8);

    let node: Arc<dyn NodeApi> = Arc::new(RestNodeApi::new(config.node_rest_url.clone()));
    let state = ChainState::open(
        args.config_dir.join(&config.db_dir),
        node.clone(),
        config.headers_window,
    )
    .await
    .context("opening chain state")?;

    let evaluator = Arc::new(RemoteEvaluator::new(config.evaluator_url.clone()));
    let registry = RequestRegistry::new(state.clone(), evaluator, config.evaluation_concurrency);

    if let Some(path) = &args.requests_file {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("reading request list")?;
            let requests = serde_json::from_str(&content).context("parsing request list")?;
            registry.load_requests(requests);
        } else {
            info!("request list {:?} does not exist yet", path);
        }
    }

    // Evaluation starts once the stream has advanced a little past the
    // height observed now; replay begins at our own last applied height
    let node_height = node.height().await.context("querying node height")?;
    let working_height = node_height + config.working_height_offset;
    let from_height = state.height().min(node_height);

    let stream = UpdatesClient::new(
        config.updates_ws_url.clone(),
        Duration::from_secs(config.stream_timeout_secs),
    )
    .spawn(from_height);

    let processor = EventProcessor::new(state.clone());
    let orchestrator = Orchestrator::new(processor, registry.clone(), working_height);

    let server = ApiServer::new(
        registry.clone(),
        state.clone(),
        RpcConfig::from_runner_config(&config, args.bind_address.clone()),
    )
    .await
    .context("starting HTTP server")?;

    let mut orchestrator_task = tokio::spawn(orchestrator.run(stream));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = &mut orchestrator_task => {
            match result {
                Ok(Ok(())) => info!("blockchain-updates stream ended"),
                Ok(Err(error)) => error!("event processing aborted: {}", error),
                Err(error) => error!("event processing panicked: {}", error),
            }
        }
    }

    server.stop().await;
    orchestrator_task.abort();

    // Keep the request list warm for the next start
    if let Some(path) = &args.requests_file {
        match serde_json::to_string_pretty(&registry.stored_requests()) {
            Ok(content) => {
                if let Err(error) = std::fs::write(path, content) {
                    warn!("cannot flush request list to {:?}: {}", path, error);
                }
            }
            Err(error) => warn!("cannot serialize request list: {}", error),
        }
    }

    state.flush().context("flushing storage")?;
    info!("stopped");
    Ok(())
}
