use std::sync::Arc;
use std::time::Duration;

use cache::{MemoryCache, SessionCache};
use clap::Parser;
use db::{SessionRepository, StageOutputRepository};
use events::EventBus;
use orchestrator::{Orchestrator, OrchestratorConfig};
use parser::CodeParser;
use server::state::AppState;
use stages::llm::OpenRouterClient;
use stages::{DocumenterStage, SecurityAuditorStage, Stage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agentflow", about = "Multi-agent code analysis service")]
struct Cli {
    #[arg(long, default_value_t = 3001)]
    port: u16,

    #[arg(long, default_value = "sqlite:agentflow.db")]
    database_url: String,

    /// Completion API key. Without one, agent runs fail and sessions
    /// end with stage errors.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = "https://openrouter.ai/api/v1")]
    llm_base_url: String,

    /// Hard ceiling for one whole session run, in seconds.
    #[arg(long, default_value_t = 600)]
    session_timeout_secs: u64,

    /// Stop a session at the first fatal error instead of driving the
    /// remaining agents.
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let pool = db::create_pool(&cli.database_url).await?;
    db::run_migrations(&pool).await?;
    let sessions = SessionRepository::new(pool.clone());
    let outputs = StageOutputRepository::new(pool);

    let cache: Arc<dyn SessionCache> = Arc::new(MemoryCache::new());
    let event_bus = EventBus::new();

    let api_key = cli.api_key.unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("No completion API key configured; agent runs will fail");
    }
    let client = Arc::new(OpenRouterClient::new(api_key, cli.llm_base_url));
    let agents: Vec<Arc<dyn Stage>> = vec![
        Arc::new(DocumenterStage::new(client.clone())),
        Arc::new(SecurityAuditorStage::new(client)),
    ];

    let config = OrchestratorConfig {
        session_timeout: Duration::from_secs(cli.session_timeout_secs),
        fail_fast: cli.fail_fast,
        ..Default::default()
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(CodeParser::new()),
        agents,
        sessions.clone(),
        outputs,
        cache.clone(),
        event_bus.clone(),
        config,
    ));

    let state = AppState {
        orchestrator,
        sessions,
        cache,
        event_bus,
    };
    let app = server::create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port)).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
