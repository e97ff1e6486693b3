use std::sync::Arc;

use waygate::blast::{BlastDispatcher, BlastScheduler, BlastService, spawn_template_sync};
use waygate::channel::{ChannelAdapter, CloudApiChannel, CloudApiConfig};
use waygate::config::GatewayConfig;
use waygate::flow::{FlowEngine, FlowService};
use waygate::quota::QuotaGate;
use waygate::store::{LibSqlStore, Store};
use waygate::template::TemplateSync;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let access_token = std::env::var("WAYGATE_ACCESS_TOKEN").unwrap_or_else(|_| {
        eprintln!("Error: WAYGATE_ACCESS_TOKEN not set");
        eprintln!("  export WAYGATE_ACCESS_TOKEN=EAAG...");
        std::process::exit(1);
    });
    let base_url = std::env::var("WAYGATE_API_BASE")
        .unwrap_or_else(|_| "https://graph.facebook.com".to_string());
    let api_version = std::env::var("WAYGATE_API_VERSION").unwrap_or_else(|_| "v19.0".to_string());
    let db_path =
        std::env::var("WAYGATE_DB_PATH").unwrap_or_else(|_| "./data/waygate.db".to_string());

    eprintln!("📨 Waygate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {base_url}/{api_version}");
    eprintln!("   Database: {db_path}");

    let config = GatewayConfig::default();

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );

    let channel: Arc<dyn ChannelAdapter> = Arc::new(CloudApiChannel::new(CloudApiConfig {
        base_url,
        api_version,
        access_token: secrecy::SecretString::from(access_token),
    }));

    let quota = QuotaGate::new(Arc::clone(&store));
    let dispatcher = Arc::new(BlastDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&channel),
        quota.clone(),
        config.clone(),
    ));
    let scheduler = BlastScheduler::new(Arc::clone(&store), Arc::clone(&dispatcher), &config);

    // Wired up for the webhook/API layer that embeds this gateway.
    let _flow_engine = FlowEngine::new(Arc::clone(&store), Arc::clone(&channel), quota.clone());
    let _flow_service = FlowService::new(Arc::clone(&store));
    let _blast_service = BlastService::new(
        Arc::clone(&store),
        Arc::clone(&dispatcher),
        Arc::clone(&scheduler),
    );

    // Re-arm anything that came due while we were down.
    match scheduler.recover_missed().await {
        Ok(recovered) if recovered > 0 => {
            eprintln!("   Recovered {recovered} missed blast schedules")
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Missed-blast recovery failed"),
    }

    let _sync_handle = spawn_template_sync(
        TemplateSync::new(Arc::clone(&store), Arc::clone(&channel)),
        config.template_sync_interval,
    );

    eprintln!("   Ready. Ctrl-C to stop.\n");
    tokio::signal::ctrl_c().await?;
    scheduler.shutdown();
    eprintln!("Shutting down.");
    Ok(())
}
