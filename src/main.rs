//! Command line front end for syncing a Casio GPR-B1000 watch

use clap::{Parser, Subcommand};
use log::{error, info};
use rangeman_sync::progress::{
    COMMAND_SENDING_ERROR, FAILED_TO_CONNECT, FOUND_CASIO_DEVICE, PLEASE_CONNECT_WATCH,
    SCANNING_ABORTED, SUCCESSFULLY_CONNECTED,
};
use rangeman_sync::{
    device_by_address, find_watch, open_adapter, send_route, BlueRTransport, ProgressReporter,
    SyncConfig, SyncError, SyncOrchestrator, WatchController,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "rangeman-sync")]
#[command(about = "Download logs from and upload routes to a Casio GPR-B1000 watch")]
struct Args {
    /// Bluetooth MAC address of the watch; scans by name when omitted
    #[arg(long, value_name = "MAC_ADDRESS")]
    address: Option<String>,

    /// Retries after a CRC error before a download gives up
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Seconds to wait for a transmission or an expected notification
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Pause after every command write, in milliseconds
    #[arg(long, default_value = "20")]
    command_delay_ms: u64,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List the logs recorded on the watch
    Headers,
    /// Download one log by its header ordinal (1-20)
    Log { ordinal: usize },
    /// Download the raw point memory
    PointMemory,
    /// Upload a route from pre-built data and header blocks
    Upload {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        header: PathBuf,
    },
}

impl Args {
    fn config(&self) -> SyncConfig {
        let timeout = Duration::from_secs(self.timeout_secs);
        SyncConfig {
            command_delay: Duration::from_millis(self.command_delay_ms),
            notification_timeout: timeout,
            transmission_timeout: timeout,
            max_crc_retries: self.max_retries,
            ..SyncConfig::default()
        }
    }
}

async fn run(
    action: &Action,
    controller: WatchController,
    progress: ProgressReporter,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    match action {
        Action::Headers => {
            let listing = SyncOrchestrator::new(controller, progress)
                .download_headers()
                .await?;
            Ok(serde_json::to_value(&listing)?)
        }
        Action::Log { ordinal } => {
            let orchestrator = SyncOrchestrator::new(controller, progress);
            let listing = orchestrator.download_headers().await?;
            let records = orchestrator.download_log(&listing, *ordinal).await?;
            Ok(json!({
                "header": listing.header(*ordinal),
                "records": records,
            }))
        }
        Action::PointMemory => {
            let orchestrator = SyncOrchestrator::new(controller, progress);
            let listing = orchestrator.download_headers().await?;
            let raw = orchestrator.download_point_memory(&listing).await?;
            let hex: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
            Ok(json!({
                "count": listing.point_memory.count,
                "data": hex,
            }))
        }
        Action::Upload { data, header } => {
            let data = tokio::fs::read(data).await?;
            let header = tokio::fs::read(header).await?;
            send_route(controller, progress, data, header).await?;
            Ok(json!({ "uploaded": true }))
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config();
    info!("Sync settings: {}", config);

    let progress = ProgressReporter::silent();
    let (_session, adapter) = open_adapter().await?;

    let device = match &args.address {
        Some(address) => device_by_address(&adapter, address)?,
        None => {
            progress.message(PLEASE_CONNECT_WATCH);
            let (cancel_tx, cancel_rx) = oneshot::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = cancel_tx.send(());
                }
            });
            match find_watch(&adapter, &config, cancel_rx).await {
                Ok(device) => device,
                Err(SyncError::Cancelled) => {
                    progress.message(SCANNING_ABORTED);
                    return Ok(());
                }
                Err(e) => return Err(Box::new(e) as Box<dyn std::error::Error>),
            }
        }
    };

    progress.message(FOUND_CASIO_DEVICE);
    let transport = match BlueRTransport::connect(device).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            progress.message(FAILED_TO_CONNECT);
            return Err(Box::new(e) as Box<dyn std::error::Error>);
        }
    };
    progress.message(SUCCESSFULLY_CONNECTED);

    let controller = WatchController::new(transport.clone(), config);
    let result = run(&args.command, controller, progress.clone()).await;

    if let Err(e) = transport.disconnect().await {
        error!("Failed to disconnect: {}", e);
    }

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            progress.message(COMMAND_SENDING_ERROR);
            Err(e)
        }
    }
}
