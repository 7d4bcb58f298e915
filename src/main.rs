// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use evistream::client::AnalysisClient;
use evistream::config;
use evistream::sink::TracingSink;
use evistream::store::FileResultStore;
use evistream::transport::HttpTransport;

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "evistream", about = "Streaming client for forensic evidence analysis")]
struct Cli {
    /// Path to the evistream.yaml config file
    #[arg(long, default_value = "evistream.yaml", env = "EVISTREAM_CONFIG")]
    config: String,

    /// Override the analyze endpoint from the config
    #[arg(long, env = "EVISTREAM_ENDPOINT")]
    endpoint: Option<String>,

    /// Evidence file to upload and analyze
    file: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = config::FileSource {
        path: PathBuf::from(cli.config),
    };
    let mut config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }

    tracing::info!(
        endpoint = %config.endpoint,
        results_dir = %config.results_dir.display(),
        "evistream starting"
    );

    let transport = match HttpTransport::from_config(&config) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("failed to build transport: {e}");
            std::process::exit(1);
        }
    };
    let store = FileResultStore::new(config.results_dir.clone());
    let client = AnalysisClient::new(Arc::new(transport), Arc::new(store), &config);

    // Ctrl-C stops reading the feed; no further callbacks fire after this.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling analysis");
                cancel.cancel();
            }
        });
    }

    let sink = TracingSink::new();
    let outcome = match client.analyze(&cli.file, &sink, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("analysis failed: {e}");
            std::process::exit(1);
        }
    };

    let Some(raw) = outcome.raw_result else {
        tracing::error!(
            analysis_id = %outcome.analysis_id,
            events = outcome.events,
            "stream completed without a terminal result"
        );
        std::process::exit(2);
    };

    tracing::info!(
        analysis_id = %outcome.analysis_id,
        kind = outcome.result.as_ref().map(|p| p.kind()).unwrap_or("unrecognized"),
        events = outcome.events,
        malformed = outcome.malformed,
        "analysis finished"
    );

    match serde_json::to_string_pretty(&raw) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("failed to render result: {e}");
            std::process::exit(1);
        }
    }
}
