use anyhow::Context;
use clap::Parser;
use rift_grpc_stub::config::StubConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Programmable gRPC stub server
#[derive(Parser, Debug)]
#[command(name = "rift-grpc-stub", version, about)]
struct Args {
    /// YAML or JSON stub configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on; overrides the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// FileDescriptorSet file (repeatable)
    #[arg(short, long = "descriptor-set")]
    descriptor_sets: Vec<PathBuf>,

    /// Log format: text (default), json
    #[arg(long, default_value = "text")]
    log_format: String,
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_format);

    let mut config = match &args.config {
        Some(path) => StubConfig::from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => serde_yaml::from_str("{}")?,
    };
    config.descriptor_sets.extend(args.descriptor_sets);
    if let Some(listen) = args.listen {
        config.listen = Some(listen);
    }
    if config.descriptor_sets.is_empty() {
        anyhow::bail!("No descriptor sets given; use --descriptor-set or 'descriptor_sets'");
    }

    let server = config.builder()?.start().await?;
    let matchers = config.apply(&server)?;
    info!(
        "Serving on {} with {} stub(s); press Ctrl-C to stop",
        server.addr(),
        matchers.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.close().await;
    Ok(())
}
