// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use ff_exec::ExecutorBindings;
use ff_exec::bindings::ReqwestToolClient;
use ff_exec::mock::{EchoCodeRuntime, MemoryHumanTasks, ScriptedModelClient, StaticBuiltins};
use ff_gateway::config::GatewayConfig;
use ff_gateway::{Stores, build_app, build_state};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ff-gateway", version, about = "Function Fabric gateway")]
struct Args {
    /// Bind address (overrides the config file).
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,

    /// Wire mock model/sandbox/task bindings for local development.
    #[arg(long)]
    mock_bindings: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("ff=debug,ff_gateway=debug,tower_http=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ff=info,ff_gateway=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
        config.validate().context("validate overridden bind")?;
    }

    let bindings = if args.mock_bindings {
        info!("wiring mock bindings (model, sandbox, human tasks, builtins)");
        ExecutorBindings {
            model: Some(Arc::new(ScriptedModelClient::new())),
            code_runtime: Some(Arc::new(EchoCodeRuntime)),
            human_tasks: Some(Arc::new(MemoryHumanTasks::new())),
            http_tools: Some(Arc::new(ReqwestToolClient::new())),
            builtins: Some(Arc::new(StaticBuiltins)),
            invoker: None,
        }
    } else {
        ExecutorBindings {
            http_tools: Some(Arc::new(ReqwestToolClient::new())),
            ..Default::default()
        }
    };

    let state = build_state(&config, Stores::in_memory(), bindings, None);
    let app = build_app(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(
        bind = %config.bind,
        service = %config.service_name,
        "ff-gateway listening"
    );

    axum::serve(listener, app).await.context("serve")
}
