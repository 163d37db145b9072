use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cupertino_processor::config::ProcessorConfig;
use cupertino_processor::service::StreamProcessorService;
use cupertino_processor::sim;

/// Zone-analytics stream processor: video in, detections and zone events
/// out on the MQTT data plane, runtime commands on the control plane.
#[derive(Parser)]
#[command(name = "cupertino-processor", version)]
struct Args {
    /// Path to the processor configuration YAML.
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cupertino=info,cupertino_processor=info".into()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ProcessorConfig::from_yaml(&args.config)?;
    info!(
        "🎥 Cupertino stream processor v{} starting (service_id={})",
        env!("CARGO_PKG_VERSION"),
        config.service_id
    );

    let runtime = sim::simulation_runtime(&config).with_context(|| {
        format!(
            "source '{}' needs an external decoder and inference engine; \
             this build ships the simulation runtime only — add a `simulation:` \
             section to the config",
            config.source_url
        )
    })?;

    let mut service = StreamProcessorService::new(config, runtime);
    service.setup()?;
    service.start().await?;
    info!("service running; press Ctrl+C to stop");

    tokio::select! {
        _ = service.wait() => info!("pipeline finished"),
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    service.stop().await;
    Ok(())
}
