/*
 * 5D Labs Agent Platform - Ownership Labeller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Ownership Labeller Service
//!
//! Labels operator-owned objects with `olm.managed=true` and exits with
//! status 0 once every configured kind is labelled, so the supervising
//! Deployment restarts it with a narrower watch set.

use clap::Parser;
use ownership_labeller::{run_labellers, LabellerConfig, RunOutcome};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ownership-labeller", version, about)]
struct Args {
    /// Path to the mounted labeller configuration
    #[arg(long, env = "LABELLER_CONFIG", default_value = "/config/config.yaml")]
    config: String,

    /// Namespace to watch, overriding the configuration file
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<LabellerConfig> {
    let mut config = match LabellerConfig::from_mounted_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Failed to load configuration, using defaults: {}", e);
            LabellerConfig::default()
        }
    };

    if let Some(namespace) = &args.namespace {
        config.namespace = Some(namespace.clone());
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting ownership labeller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let config = load_config(&args).inspect_err(|e| {
        error!("Configuration validation failed: {}", e);
    })?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    tokio::select! {
        outcome = run_labellers(client, &config) => match outcome {
            RunOutcome::TerminationRequested => {
                info!("Detected that every object is labelled, exiting to re-start the process...");
                std::process::exit(0);
            }
            RunOutcome::NothingToWatch => {
                info!("All kinds labelled on startup, idling until shutdown");
                shutdown_signal().await;
            }
            RunOutcome::Stopped => {
                error!("Labelling controllers stopped unexpectedly");
                anyhow::bail!("labelling controllers stopped");
            }
        },
        () = shutdown_signal() => {}
    }

    info!("Ownership labeller shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
