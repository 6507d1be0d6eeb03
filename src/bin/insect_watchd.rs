//! insect_watchd - insect watch daemon
//!
//! This daemon:
//! 1. Loads store credentials, the detector model and the camera (all fatal on failure)
//! 2. Starts the notification worker
//! 3. Serves the annotated video stream and the sensor history over HTTP
//! 4. Runs until Ctrl-C, then delivers queued alerts before exiting

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use insect_watch::{
    api::{ApiConfig, ApiServer, AppState},
    config::WatchdConfig,
    open_source, AlertGate, AlertPolicy, AlertSink, DetectionLoop, DetectorBackend, LineNotifier,
    LogOnlySink, NotificationWorker, RestSnapshotStore, SnapshotStore, StoreCredentials,
    StreamSettings,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = WatchdConfig::load()?;

    let credentials_path = cfg.store.credentials_path.clone().ok_or_else(|| {
        anyhow!("store.credentials_path (or INSECT_WATCH_CREDENTIALS) must be set")
    })?;
    let credentials = StoreCredentials::load(&credentials_path)?;
    log::info!(
        "sensor history store: {} (project {})",
        credentials.database_url,
        credentials.project_id.as_deref().unwrap_or("-")
    );
    let store: Arc<dyn SnapshotStore> =
        Arc::new(RestSnapshotStore::new(&credentials, cfg.store.timeout));

    let mut detector = load_detector(&cfg)?;
    detector.warm_up()?;
    log::info!(
        "detector '{}' loaded from {}",
        detector.name(),
        cfg.model.path.display()
    );

    let source = open_source(&cfg.camera)?;
    log::info!(
        "camera {} opened ({}x{} @ {} fps)",
        cfg.camera.source,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.target_fps
    );

    let sink: Box<dyn AlertSink> = match &cfg.alert.token {
        Some(token) => {
            let notifier =
                LineNotifier::new(cfg.alert.notify_url.clone(), token.clone(), cfg.alert.timeout)?;
            Box::new(NotificationWorker::spawn(
                notifier,
                cfg.alert.message.clone(),
                cfg.alert.queue_capacity,
            )?)
        }
        None => {
            log::warn!("no notify token configured; alerts will only be logged");
            Box::new(LogOnlySink)
        }
    };

    let policy = AlertPolicy::new(cfg.alert.target_label.clone(), cfg.alert.threshold)?;
    log::info!(
        "alerting on '{}' above {:.2} (cooldown {}s)",
        policy.target_label,
        policy.threshold,
        cfg.alert.cooldown.as_secs()
    );
    let pipeline = DetectionLoop::new(source, detector, policy, sink)
        .with_gate(AlertGate::new(cfg.alert.cooldown))
        .with_settings(StreamSettings {
            jpeg_quality: cfg.stream.jpeg_quality,
            on_frame_error: cfg.stream.on_frame_error,
            max_consecutive_skips: cfg.stream.max_consecutive_skips,
            ..StreamSettings::default()
        });

    let state = Arc::new(AppState::new(pipeline, store));
    let api_config = ApiConfig {
        addr: cfg.http_addr.clone(),
        log_limit: cfg.log_limit,
    };
    let api_handle = ApiServer::new(api_config, state.clone()).spawn()?;
    log::info!("insect_watchd listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("insect_watchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    log::info!("delivering queued alerts...");
    state.stop();
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn load_detector(cfg: &WatchdConfig) -> Result<Box<dyn DetectorBackend>> {
    let backend = insect_watch::TractBackend::new(
        &cfg.model.path,
        cfg.model.input_size,
        cfg.model.labels.clone(),
    )?
    .with_options(cfg.model.decode);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_detector(cfg: &WatchdConfig) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "cannot load {}: insect_watchd was built without the backend-tract feature",
        cfg.model.path.display()
    ))
}
