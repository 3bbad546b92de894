// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use dev_proxy::capture::CaptureWriter;
use dev_proxy::config::Config;
use dev_proxy::pipeline::InterceptionPipeline;
use dev_proxy::proxy;
use dev_proxy::report::FileReportWriter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dev-proxy")]
struct Args {
    /// Listen address, e.g. 127.0.0.1:8000 (overrides the config file)
    #[arg(long)]
    listen: Option<String>,

    /// Optional config TOML path (watch patterns, plugins, timeouts)
    #[arg(long)]
    config: Option<String>,
}

async fn load_config(path: Option<&str>) -> Config {
    let Some(p) = path else {
        return Config::default();
    };
    Config::load_from_path(p).await.unwrap_or_else(|e| {
        warn!(%p, %e, "failed to load config, using defaults");
        Config::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cfg = load_config(args.config.as_deref()).await;
    let addr: SocketAddr = args
        .listen
        .as_deref()
        .unwrap_or(&cfg.general.listen)
        .parse()?;

    let cancel = CancellationToken::new();
    let mut pipeline = InterceptionPipeline::from_config(&cfg)?.with_cancellation(cancel.clone());
    if let Some(path) = &cfg.general.captures {
        pipeline = pipeline.with_capture(CaptureWriter::new(path.as_str()).await?);
    }
    let pipeline = Arc::new(pipeline);
    pipeline.start_recording();

    let server = proxy::run_proxy(addr, pipeline.clone());

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                error!(%e, "server error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    if let Some(stopped) = pipeline.stop_recording().await {
        info!(
            entries = stopped.log.len(),
            faults = stopped.faults.len(),
            drained = stopped.drained,
            "recording stopped"
        );
        let writer = FileReportWriter::new(&cfg.general.reports_dir);
        let files = writer.write(&stopped.reports).await?;
        info!(files = files.len(), dir = %writer.dir().display(), "reports written");
    }
    cancel.cancel();

    Ok(())
}
