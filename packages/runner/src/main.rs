mod cli;
mod config;
mod logging;
mod simulated;

use std::pin::pin;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use api::{
    ApiError, CampaignId, CampaignStatusView, InitError, PipelineApi, format_sse_event,
    init_pipeline,
};
use campaign_core::ConfigError;
use clap::Parser;
use futures_util::StreamExt;

use cli::Cli;
use simulated::SimulatedBroker;

#[derive(Debug, thiserror::Error)]
enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("failed to encode campaign status: {0}")]
    Encode(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            tracing::error!(%error, "Campaign runner failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every campaign completed.
async fn run(cli: Cli) -> Result<bool, RunnerError> {
    let config = config::load(cli.config.as_deref())?;
    let broker = Arc::new(SimulatedBroker::new(cli.fail_every, cli.running_polls));
    let api = init_pipeline(config, broker).await?;

    let printer = cli.sse.then(|| {
        let stream = api.event_stream();
        tokio::spawn(async move {
            let mut stream = pin!(stream);
            while let Some(event) = stream.next().await {
                print!("{}", format_sse_event(&event));
            }
        })
    });
    let source = cli.outage_secs.map(|secs| {
        tracing::info!(secs, "Simulating a connectivity outage");
        api.connectivity()
            .attach(simulated::outage(Duration::from_secs(secs)))
    });

    let mut running = Vec::with_capacity(cli.campaigns.len());
    for name in &cli.campaigns {
        let campaign = api.create_campaign(name).await?;
        running.push(api.start_campaign(&campaign.id.to_string()).await?);
    }

    let handles: Vec<_> = running.iter().map(|r| r.handle().clone()).collect();
    let mut dispatches = pin!(futures_util::future::join_all(running.into_iter().map(
        |running| async move { (running.campaign_id(), running.wait().await) }
    )));
    let results = tokio::select! {
        results = &mut dispatches => results,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; cancelling campaigns");
            for handle in &handles {
                handle.cancel();
            }
            dispatches.await
        }
    };

    let mut all_completed = true;
    for (campaign_id, result) in results {
        if let Err(error) = result {
            tracing::warn!(%campaign_id, %error, "Campaign did not finish");
        }
        let view = settle(&api, campaign_id).await?;
        all_completed &= view.status == api::CampaignStatus::Completed;
        println!("{}", serde_json::to_string(&view)?);
    }

    if let Some(source) = source {
        source.cancel();
    }
    api.shutdown();
    if let Some(printer) = printer {
        printer.abort();
    }
    Ok(all_completed)
}

/// The coordinator applies job events asynchronously; give it a moment to
/// catch up before reporting.
async fn settle(api: &PipelineApi, campaign_id: CampaignId) -> Result<CampaignStatusView, ApiError> {
    let id = campaign_id.to_string();
    let mut view = api.campaign_status(&id).await?;
    for _ in 0..50 {
        if view.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        view = api.campaign_status(&id).await?;
    }
    Ok(view)
}
