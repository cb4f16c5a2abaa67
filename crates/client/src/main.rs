//! Bazaar Client - Main entry point
//!
//! Runs the notification subsystem headless for the session given in the
//! environment and logs every alert until interrupted.

use std::sync::Arc;

use anyhow::Context;
use bazaar_client::config::{session_from_env, ClientConfig};
use bazaar_client::ws::StompWsTransport;
use bazaar_client::{
    ApiClient, CategoryRequestStore, ConnectionManager, ConnectionState, LogAlerts,
    NotificationStore, SessionContext,
};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bazaar_client=debug")),
        )
        .init();

    let config = ClientConfig::from_env();
    let session = session_from_env().context("BAZAAR_TOKEN must be set")?;
    tracing::info!(
        "Starting for {} ({:?}) against {}",
        session.user_id,
        session.role,
        config.broker_url
    );

    let transport = StompWsTransport::new(&config.broker_url, config.reconnect.heartbeat)
        .with_context(|| format!("invalid broker URL {}", config.broker_url))?;
    let manager = ConnectionManager::new(transport, config.reconnect.clone());
    let api = Arc::new(
        ApiClient::new()
            .with_base_url(config.api_url.clone())
            .with_credential(Some(session.credential.clone())),
    );

    let notifications = NotificationStore::new(manager.clone(), api.clone(), Arc::new(LogAlerts));
    let category_requests = CategoryRequestStore::new(manager.clone(), api, notifications.clone());

    let sessions = SessionContext::new(Some(session.clone()));
    let _following = (
        notifications.follow_session(sessions.watch()),
        category_requests.follow_session(sessions.watch()),
    );

    manager.connect(session.credential.clone());

    let mut state = manager.watch_state();
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                match current {
                    ConnectionState::Connected => {
                        notifications.fetch_notifications().await;
                        category_requests.refresh().await;
                    }
                    ConnectionState::Failed { reason } => {
                        tracing::error!("Giving up: {}", reason);
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    category_requests.unmount();
    notifications.unmount();
    sessions.logout();
    manager.disconnect();
    Ok(())
}
