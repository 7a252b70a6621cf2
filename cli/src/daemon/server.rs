// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server bootstrap and the shared service graph it (and the
//! embedded CLI commands) are built from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use codebroker_core::application::task_service::TaskService;
use codebroker_core::application::tool_registry::ToolRegistry;
use codebroker_core::application::typechecker::{Checker, NullChecker};
use codebroker_core::domain::repository::{ApprovalRepository, PolicyRepository, TaskRepository, ToolSourceRepository};
use codebroker_core::domain::runtime::SandboxRuntime;
use codebroker_core::domain::tool::ToolSource;
use codebroker_core::infrastructure::config::{BrokerConfig, SandboxRuntimeKind};
use codebroker_core::infrastructure::event_bus::EventBus;
use codebroker_core::infrastructure::repositories::{
    in_memory::{InMemoryApprovalRepository, InMemoryPolicyRepository, InMemoryTaskRepository, InMemoryToolSourceRepository},
    PostgresApprovalRepository, PostgresPolicyRepository, PostgresTaskRepository, PostgresToolSourceRepository,
};
use codebroker_core::infrastructure::runtime::{DockerRuntime, ProcessRuntime};
use codebroker_core::presentation::api::ApiState;
use codebroker_core::presentation::session_transport::SessionMap;

use super::{remove_pid_file, write_pid_file};

/// The single workspace every embedded/CLI-local operation runs against.
/// Multi-tenant workspace routing is a property of the HTTP transport
/// (`workspaceId` on each `/mcp` call); an operator driving the CLI against
/// their own node has exactly one workspace to manage.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Everything the daemon's HTTP surface, and the CLI's embedded commands,
/// need to act on the broker's state.
#[derive(Clone)]
pub struct ServiceGraph {
    pub config: BrokerConfig,
    pub task_service: Arc<TaskService>,
    pub tasks: Arc<dyn TaskRepository>,
    pub tool_sources: Arc<dyn ToolSourceRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub tools: Arc<ToolRegistry>,
    pub events: Arc<EventBus>,
}

/// Constructs the full application service graph from a loaded config:
/// repositories (Postgres if `config.database` is set, else in-memory),
/// the sandbox runtime, the tool registry (populated from `config.sources`),
/// and the task service that ties them together.
pub async fn build_service_graph(config: &BrokerConfig) -> Result<ServiceGraph> {
    let (tasks, tool_sources, approvals, policies): (
        Arc<dyn TaskRepository>,
        Arc<dyn ToolSourceRepository>,
        Arc<dyn ApprovalRepository>,
        Arc<dyn PolicyRepository>,
    ) = if let Some(url) = &config.database {
        info!("connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .context("connecting to the configured database")?;
        sqlx::migrate!("../core/migrations")
            .run(&pool)
            .await
            .context("running database migrations")?;
        (
            Arc::new(PostgresTaskRepository::new(pool.clone())),
            Arc::new(PostgresToolSourceRepository::new(pool.clone())),
            Arc::new(PostgresApprovalRepository::new(pool.clone())),
            Arc::new(PostgresPolicyRepository::new(pool)),
        )
    } else {
        info!("no database configured; using in-memory repositories");
        (
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(InMemoryToolSourceRepository::new()),
            Arc::new(InMemoryApprovalRepository::new()),
            Arc::new(InMemoryPolicyRepository::new()),
        )
    };

    let runtime: Arc<dyn SandboxRuntime> = match config.sandbox.runtime {
        SandboxRuntimeKind::Docker => {
            let socket = config.sandbox.docker_socket_path.as_deref().unwrap_or("/var/run/docker.sock");
            Arc::new(
                DockerRuntime::connect_with_socket(socket, "codebroker-sandbox:latest")
                    .context("connecting to the Docker daemon")?,
            )
        }
        SandboxRuntimeKind::Process => Arc::new(ProcessRuntime::default()),
    };

    let tools = Arc::new(ToolRegistry::new());
    let sources: Vec<ToolSource> = config
        .sources
        .iter()
        .map(|named| ToolSource::new(DEFAULT_WORKSPACE.to_string(), named.name.clone(), named.config.clone(), &HashMap::new()))
        .collect();
    for source in &sources {
        tool_sources.save(source).await.context("persisting a configured tool source")?;
    }
    let warnings = tools.reload_workspace(DEFAULT_WORKSPACE, &sources).await;
    for warning in &warnings {
        tracing::warn!(%warning, "tool source load warning");
    }

    let events = Arc::new(EventBus::with_default_capacity());
    let checker: Arc<dyn Checker> = Arc::new(NullChecker);
    let task_service = Arc::new(TaskService::new(
        tasks.clone(),
        tools.clone(),
        checker,
        runtime,
        events.clone(),
        policies.clone(),
        approvals.clone(),
        None,
    ));

    Ok(ServiceGraph {
        config: config.clone(),
        task_service,
        tasks,
        tool_sources,
        policies,
        approvals,
        tools,
        events,
    })
}

/// Runs the daemon in the foreground: builds the service graph, binds the
/// HTTP listener, and serves until a shutdown signal arrives.
pub async fn start_daemon(config_path: Option<PathBuf>, port_override: Option<u16>, host_override: Option<String>) -> Result<()> {
    let pid = std::process::id();
    write_pid_file(pid)?;
    let _guard = PidFileGuard;

    info!("codebroker daemon starting (PID: {})", pid);

    let mut config = BrokerConfig::load_or_default(config_path.as_deref()).context("loading configuration")?;
    if let Some(port) = port_override {
        config.listen.port = port;
    }
    if let Some(host) = host_override {
        config.listen.host = host;
    }

    let graph = build_service_graph(&config).await.context("initializing service graph")?;

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing the Prometheus metrics recorder")?;

    let state = ApiState {
        task_service: graph.task_service.clone(),
        sessions: Arc::new(SessionMap::new()),
        events: graph.events.clone(),
        oauth_enabled: config.oauth.is_some(),
        metrics_handle,
    };

    let app = codebroker_core::presentation::api::router(state);

    let addr = format!("{}:{}", config.listen.host, config.listen.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    info!("daemon listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("daemon shutting down");
    Ok(())
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
