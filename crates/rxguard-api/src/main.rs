//! Binary entrypoint for the RxGuard API server.
use std::sync::Arc;

use anyhow::Context;
use rxguard_api::{run, AppState};
use rxguard_audit::TracingAuditSink;
use rxguard_core::{LogFormat, Retrying, Settings};
use rxguard_reasoning::ChatCompletionsClient;
use rxguard_retrieval::GuidelineStore;
use rxguard_stages::standard_pipeline;
use tracing_subscriber::EnvFilter;

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match settings.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    init_tracing(&settings);

    let policy = settings.retry_policy();
    let reasoning = ChatCompletionsClient::from_settings(&settings)
        .context("failed to configure reasoning client")?;
    tracing::info!(model = reasoning.model(), "reasoning client ready");

    let store = Arc::new(
        GuidelineStore::from_settings(&settings).context("failed to configure guideline store")?,
    );
    let warm = Arc::clone(&store);
    tokio::spawn(async move {
        match warm.warm().await {
            Ok(chunks) => tracing::info!(chunks, "guideline index ready"),
            Err(e) => tracing::warn!(error = %e, "guideline index not ready; will retry on first case"),
        }
    });

    let pipeline = standard_pipeline(
        &settings,
        Arc::new(Retrying::new(reasoning, policy.clone())),
        Arc::new(Retrying::new(store, policy)),
        Arc::new(TracingAuditSink),
    );
    tracing::info!(pipeline = pipeline.pipeline_id(), "pipeline assembled");

    let state = AppState::new(pipeline).context("failed to register metrics")?;
    run(&settings.listen_addr, state).await.context("server error")?;
    Ok(())
}
