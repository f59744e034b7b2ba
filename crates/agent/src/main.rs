mod cli;
mod logging;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use transcode_agent_core::settings::AgentSettings;
use transcode_agent_engine::driver::Driver;
use transcode_agent_engine::executor::JobExecutor;
use transcode_agent_engine::orchestrator::OrchestratorClient;
use transcode_agent_engine::probe;
use transcode_agent_engine::slot::JobSlot;
use transcode_agent_engine::sync::SyncController;

use cli::Cli;
use shutdown::{spawn_signal_handlers, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ffmpeg_bin = cli.ffmpeg_bin.clone();
    let ffprobe_bin = cli.ffprobe_bin.clone();

    let settings = match AgentSettings::load(cli.into()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    logging::init(&settings.log_level);
    info!(worker_id = %settings.worker_id, orchestrator_url = %settings.orchestrator_url, "starting transcoding agent");

    let capabilities = match probe::enumerate_capabilities(&ffmpeg_bin).await {
        Ok(capabilities) => capabilities,
        Err(e) => {
            error!(error = %e, "capability probe failed");
            std::process::exit(1);
        }
    };
    info!(codecs = ?capabilities.supported_codecs, has_gpu = capabilities.has_gpu, "capabilities enumerated");

    let http = reqwest::Client::new();
    let orchestrator = OrchestratorClient::new(http, settings.orchestrator_url.clone(), settings.worker_id.clone());

    if let Err(e) = orchestrator.register(&capabilities).await {
        error!(error = %e, "registration with orchestrator failed");
        std::process::exit(1);
    }
    info!("registered with orchestrator");

    let driver = Driver { ffmpeg_bin, ffprobe_bin };
    let slot = JobSlot::empty();
    let executor = Arc::new(JobExecutor::new(
        driver,
        orchestrator.clone(),
        settings.nas_mount_path.clone(),
        settings.temp_dir.clone(),
        settings.worker_id.clone(),
    ));
    let sync_controller = Arc::new(SyncController::new(
        orchestrator.clone(),
        executor.clone(),
        slot.clone(),
        settings.worker_id.clone(),
        settings.sync_interval,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let sync_task = tokio::spawn({
        let sync_controller = sync_controller.clone();
        let capabilities = capabilities.clone();
        async move { sync_controller.run(stop_rx, capabilities).await }
    });

    let shutdown_ctl = ShutdownController::new();
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<ShutdownEvent>(4);
    spawn_signal_handlers(shutdown_ctl, shutdown_tx);

    match shutdown_rx.recv().await {
        Some(ShutdownEvent::Immediate) | None => {
            info!("exiting immediately");
            return Ok(());
        }
        Some(ShutdownEvent::Graceful) => {
            info!("graceful shutdown: cancelling current job if any");
            slot.cancel_current().await;
            let _ = stop_tx.send(true);

            let teardown = async {
                let _ = sync_task.await;
                // Wait for the cancelled job's own task to finish so its
                // terminal Finalize call is sent before the runtime drops it.
                slot.join_current().await;
                sync_controller.sync_offline().await;
            };

            tokio::select! {
                _ = teardown => {
                    info!("agent shut down cleanly");
                }
                _ = wait_for_immediate(&mut shutdown_rx) => {
                    info!("second shutdown signal received, exiting immediately");
                }
            }
        }
    }

    Ok(())
}

/// Drains further shutdown events while teardown is in flight, returning as
/// soon as a second signal escalates to an immediate exit.
async fn wait_for_immediate(rx: &mut mpsc::Receiver<ShutdownEvent>) {
    while let Some(event) = rx.recv().await {
        if event == ShutdownEvent::Immediate {
            return;
        }
    }
}
