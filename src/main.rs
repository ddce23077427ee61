use anyhow::Result;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use threat_vault::api::rest::{AppState, RestApi};
use threat_vault::config;
use threat_vault::crypto::FieldCodec;
use threat_vault::db::repositories::{MediaBlobsRepository, ThreatEventsRepository};
use threat_vault::db::DatabaseService;
use threat_vault::services::capture::{
    CaptureSettings, CaptureState, CaptureSupervisor, DetectorProcessWorker,
};
use threat_vault::services::lifecycle::ThreatLifecycle;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting threat-vault");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;
    info!("Configuration loaded");

    let db = Arc::new(DatabaseService::new(&config.database).await?);

    let codec = Arc::new(FieldCodec::from_config(&config.encryption)?);
    let events = Arc::new(ThreatEventsRepository::new(db.pool.clone(), codec));
    let blobs = Arc::new(MediaBlobsRepository::new(db.pool.clone()));
    let lifecycle = Arc::new(ThreatLifecycle::new(events, blobs));

    let capture_defaults = CaptureSettings::from(&config.capture);
    let worker = Arc::new(DetectorProcessWorker::new(
        config.capture.detector_command.clone(),
    ));
    let supervisor = Arc::new(CaptureSupervisor::new(worker, capture_defaults));

    let api = RestApi::new(
        &config.api,
        AppState {
            lifecycle,
            supervisor: Arc::clone(&supervisor),
            capture_defaults,
            db,
        },
    )?;

    tokio::spawn(async move {
        if let Err(e) = api.run().await {
            error!("API server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    if supervisor.state().await == CaptureState::Running {
        match supervisor.stop().await {
            Ok(_) => info!("Capture worker stopped"),
            Err(e) => error!("Failed to stop capture worker: {}", e),
        }
    }

    Ok(())
}
