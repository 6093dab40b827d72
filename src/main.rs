use clap::Parser;
use multi_agent_runtime::agents::orchestrator::{Orchestrator, OrchestratorConfig};
use multi_agent_runtime::agents::roles::{
    BackendAgent, DatabaseAgent, DevopsAgent, DocsAgent, FrontendAgent, QaAgent, SecurityAgent, UxUiAgent,
};
use multi_agent_runtime::agents::AgentRuntime;
use multi_agent_runtime::bus::{get_event_bus, EventBus};
use multi_agent_runtime::cli::{exit_code, Cli, Command};
use multi_agent_runtime::config::Config;
use multi_agent_runtime::event::{Event, EventKind};
use multi_agent_runtime::external::{
    ArtifactSink, FilesystemArtifactSink, LlmClient, LlmTaskDecomposer, MockLlmClient, ReqwestLlmClient, TaskDecomposer,
};
use multi_agent_runtime::store::{state_path, FeatureStatus, Store};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(exit_code::USER_ERROR as u8);
        }
    };

    match run(cli.command, config).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!(error = %e, "runtime error");
            ExitCode::from(exit_code::RUNTIME_ERROR as u8)
        }
    }
}

async fn run(command: Command, config: Config) -> multi_agent_runtime::Result<i32> {
    let store = Arc::new(Store::load(state_path(&config.project_root)).await?);

    match command {
        Command::Status => {
            let stats = store.get_task_statistics().await;
            let health = store.task_health_check().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(exit_code::SUCCESS)
        }
        Command::Trigger { description } => {
            let feature_id = uuid::Uuid::new_v4().to_string();
            store.add_feature(&feature_id, &description).await?;
            info!(feature_id, "feature recorded; will be picked up on next launch");
            Ok(exit_code::SUCCESS)
        }
        Command::Reset => {
            let path = state_path(&config.project_root);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tokio::fs::remove_file(&path).await?;
            }
            Ok(exit_code::SUCCESS)
        }
        Command::Launch { agents, timeout } => {
            launch(config, store, agents, timeout).await?;
            Ok(exit_code::SUCCESS)
        }
    }
}

async fn launch(
    config: Config,
    store: Arc<Store>,
    agents_override: Option<Vec<String>>,
    timeout_secs: Option<u64>,
) -> multi_agent_runtime::Result<()> {
    let bus = get_event_bus(&(&config.event_bus).into()).await?;

    let llm: Arc<dyn LlmClient> = if config.test_mode {
        Arc::new(MockLlmClient)
    } else {
        Arc::new(ReqwestLlmClient::new(
            "https://api.anthropic.com",
            std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            config.model_name.clone(),
        ))
    };
    let sink: Arc<dyn ArtifactSink> = Arc::new(FilesystemArtifactSink::new(config.project_root.clone()));
    let decomposer: Arc<dyn TaskDecomposer> = Arc::new(LlmTaskDecomposer::new(llm.clone()));

    let enabled = agents_override.unwrap_or_else(|| config.enabled_agents.clone());

    let orchestrator = Orchestrator::new(
        bus.clone(),
        store.clone(),
        decomposer,
        OrchestratorConfig {
            enabled_roles: enabled.clone(),
            stall_timeout: config.stall_timeout,
            max_retries: config.max_retries,
            cleanup_retention: config.cleanup_retention,
            health_check_interval: config.heartbeat_interval,
            ..OrchestratorConfig::default()
        },
    );
    orchestrator.start().await?;

    replay_new_features(&bus, &store).await?;

    let runtimes = spawn_enabled_agents(&enabled, &bus, &store, &llm, &sink);
    for runtime in &runtimes {
        runtime.start().await?;
    }

    info!(agents = ?enabled, "runtime launched");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };

    match timeout_secs {
        Some(secs) => {
            tokio::select! {
                _ = shutdown => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {
                    info!("launch timeout elapsed");
                }
            }
        }
        None => shutdown.await,
    }

    bus.publish(Event::new(EventKind::SystemShutdown, "cli")).await?;

    for runtime in &runtimes {
        runtime.shutdown().await?;
    }
    orchestrator.shutdown().await?;
    bus.stop().await?;

    Ok(())
}

/// Bridges CLI-triggered features recorded while no runtime was running:
/// any feature still in `New` status gets a `FeatureCreated` republish so
/// the orchestrator picks it up on this launch.
async fn replay_new_features(bus: &Arc<dyn EventBus>, store: &Arc<Store>) -> multi_agent_runtime::Result<()> {
    for feature in store.get_all_features().await {
        if feature.status == FeatureStatus::New {
            bus.publish(
                Event::new(EventKind::FeatureCreated, "cli")
                    .with_field("feature_id", feature.id)
                    .with_field("description", feature.description),
            )
            .await?;
        }
    }
    Ok(())
}

/// Boxed `AgentRuntime<T>` values don't share a concrete type, so each
/// runtime is wrapped behind a tiny trait object for uniform start/shutdown.
#[async_trait::async_trait]
trait RunningAgent: Send + Sync {
    async fn start(&self) -> multi_agent_runtime::Result<()>;
    async fn shutdown(&self) -> multi_agent_runtime::Result<()>;
}

#[async_trait::async_trait]
impl<A: multi_agent_runtime::agents::Agent> RunningAgent for AgentRuntime<A> {
    async fn start(&self) -> multi_agent_runtime::Result<()> {
        AgentRuntime::start(self).await
    }

    async fn shutdown(&self) -> multi_agent_runtime::Result<()> {
        AgentRuntime::shutdown(self).await
    }
}

fn spawn_enabled_agents(
    enabled: &[String],
    bus: &Arc<dyn EventBus>,
    store: &Arc<Store>,
    llm: &Arc<dyn LlmClient>,
    sink: &Arc<dyn ArtifactSink>,
) -> Vec<Box<dyn RunningAgent>> {
    let mut runtimes: Vec<Box<dyn RunningAgent>> = Vec::new();

    for role in enabled {
        match role.as_str() {
            "frontend_agent" => runtimes.push(Box::new(AgentRuntime::new(
                FrontendAgent::new(llm.clone(), sink.clone()),
                bus.clone(),
                store.clone(),
            ))),
            "backend_agent" => runtimes.push(Box::new(AgentRuntime::new(
                BackendAgent::new(llm.clone(), sink.clone(), bus.clone()),
                bus.clone(),
                store.clone(),
            ))),
            "db_agent" => runtimes.push(Box::new(AgentRuntime::new(
                DatabaseAgent::new(llm.clone(), sink.clone(), bus.clone()),
                bus.clone(),
                store.clone(),
            ))),
            "devops_agent" => runtimes.push(Box::new(AgentRuntime::new(
                DevopsAgent::new(llm.clone(), sink.clone()),
                bus.clone(),
                store.clone(),
            ))),
            "qa_agent" => runtimes.push(Box::new(AgentRuntime::new(
                QaAgent::new(llm.clone(), sink.clone()),
                bus.clone(),
                store.clone(),
            ))),
            "docs_agent" => runtimes.push(Box::new(AgentRuntime::new(
                DocsAgent::new(llm.clone(), sink.clone()),
                bus.clone(),
                store.clone(),
            ))),
            "security_agent" => runtimes.push(Box::new(AgentRuntime::new(
                SecurityAgent::new(llm.clone(), sink.clone()),
                bus.clone(),
                store.clone(),
            ))),
            "ux_ui_agent" => runtimes.push(Box::new(AgentRuntime::new(
                UxUiAgent::new(llm.clone(), sink.clone()),
                bus.clone(),
                store.clone(),
            ))),
            other => tracing::warn!(role = other, "unknown role in enabled agents list, skipping"),
        }
    }

    runtimes
}
