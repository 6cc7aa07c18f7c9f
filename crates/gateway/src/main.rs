use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cf_bitable::HttpBitableClient;
use cf_cache::SystemClock;
use cf_domain::config::{Config, ConfigSeverity, ObservabilityConfig};
use cf_gateway::api;
use cf_gateway::cli::{config_path, Cli, Command, ConfigCommand};
use cf_gateway::state::AppState;
use cf_llm::{LlmFacade, OpenAiCompatLlm};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let config = load_config()?;
            init_tracing(&config.observability)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::ReloadConfig { server }) => {
            cf_gateway::cli::reload::run(&server)
                .await
                .context("reload-config")?;
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            if !cf_gateway::cli::config_cmd::validate(&config_path()) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    let path = config_path();
    let config = if Path::new(&path).exists() {
        Config::load(Path::new(&path)).with_context(|| format!("loading {path}"))?
    } else {
        tracing::warn!(path = %path, "config file missing, using defaults");
        Config::default()
    };

    let issues = config.validate();
    for issue in &issues {
        eprintln!("{issue}");
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config has errors, aborting");
    }
    Ok(config)
}

fn init_tracing(obs: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cf_gateway=debug"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    match &obs.otlp_endpoint {
        Some(endpoint) => {
            use opentelemetry_otlp::WithExportConfig as _;
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .build()
                .context("building OTLP exporter")?;
            let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                    obs.sample_rate,
                ))
                .with_resource(
                    opentelemetry_sdk::Resource::builder()
                        .with_service_name(obs.service_name.clone())
                        .build(),
                )
                .build();
            use opentelemetry::trace::TracerProvider as _;
            let tracer = provider.tracer("caseflow");
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
        }
    }
    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);
    let client = Arc::new(
        HttpBitableClient::new(&config.bitable, clock).context("building bitable client")?,
    );

    let llm: Arc<dyn LlmFacade> = match config.llm.providers.first() {
        Some(provider) => Arc::new(
            OpenAiCompatLlm::new(&config.llm, provider).context("building LLM provider")?,
        ),
        None => {
            tracing::warn!("no LLM providers configured; planner and extractors degrade to rules");
            Arc::new(cf_llm::NullLlm)
        }
    };

    let state = AppState::build(config.clone(), client, llm);
    let app = api::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "caseflow listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
