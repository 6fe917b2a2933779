pub mod billing;
pub mod cloud;
pub mod config;
pub mod event;
pub mod gcp;
pub mod metrics_defs;
pub mod reconciler;
pub mod service;
#[cfg(test)]
mod testutils;

use cloud::ApiError;
use config::ValidationError;
use gcp::GcpClient;
use reconciler::{ProjectLifecycleReconciler, Settings};
use service::PushService;
use shared::admin_service::AdminService;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerServiceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("could not create API client: {0}")]
    Client(#[from] ApiError),
}

/// Build a reconciler talking to the configured cloud endpoints.
pub fn build(config: &config::Config) -> Result<ProjectLifecycleReconciler, ReconcilerServiceError> {
    let settings = Settings::from_config(config)?;
    let client = GcpClient::new(config.api.clone(), config.auth.clone())?;

    tracing::info!(
        billing_account = %settings.billing_account,
        label_policy = ?settings.label_policy,
        "reconciler configured"
    );
    if settings.label_policy == config::LabelPolicy::Replace {
        tracing::warn!("label policy is replace: provisioning discards existing project labels");
    }

    Ok(ProjectLifecycleReconciler::new(settings, Arc::new(client)))
}

/// Serve push deliveries and the admin endpoints until either listener fails.
pub async fn run(config: config::Config) -> Result<(), ReconcilerServiceError> {
    let reconciler = build(&config)?;

    let push_listener = shared::http::bind(&config.listener.host, config.listener.port).await?;
    let admin_listener =
        shared::http::bind(&config.admin_listener.host, config.admin_listener.port).await?;

    let ready = Arc::new(AtomicBool::new(false));
    let is_ready = ready.clone();

    let push_task = shared::http::serve(push_listener, PushService::new(reconciler));
    let admin_task = shared::http::serve(
        admin_listener,
        AdminService::new(move || is_ready.load(Ordering::Relaxed)),
    );

    ready.store(true, Ordering::Relaxed);
    tokio::try_join!(push_task, admin_task)?;
    Ok(())
}
