//! Portcullis Daemon - Main entry point
//!
//! Runs the identification controller against the bench adapters: a sensor
//! nobody touches, a console keypad and log-only feedback and recording.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portcullis_daemon::{
    feedback, keypad, AbsentFingerSensor, Controller, DaemonConfig, EnrollmentService,
    LogRecorder,
};
use portcullis_vault::CredentialStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portcullis_daemon=info,portcullis_vault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Portcullis daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = DaemonConfig::default_path();
    let (config, created) = DaemonConfig::load_or_create(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    }

    // Ensure directories exist
    config.ensure_directories()?;

    // Initialize components
    let store = Arc::new(CredentialStore::open(config.store_config())?);
    let tracker = Arc::new(config.open_tracker()?);
    let enrollment = Arc::new(EnrollmentService::new(Arc::clone(&store), tracker));

    if !store.admin_configured()? {
        info!("No admin password set; run `portcullis-admin init` before issuing codes");
    }

    let (controller, handle) = Controller::new(
        config.controller.clone(),
        config.lockout.clone(),
        store,
        enrollment,
        Arc::new(AbsentFingerSensor),
        Arc::new(LogRecorder),
    )?;

    let feedback_handle = tokio::spawn(feedback::log_feedback(handle.subscribe()));

    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!("Controller error: {}", e);
        }
    });

    let keypad_handle = tokio::spawn(async move {
        if let Err(e) = keypad::run_console_keypad(handle).await {
            error!("Keypad error: {}", e);
        }
    });

    info!("Daemon started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = controller_handle => {
            info!("Controller exited");
        }
        _ = keypad_handle => {
            info!("Keypad input closed");
        }
    }

    feedback_handle.abort();
    info!("Daemon shutting down");

    Ok(())
}
