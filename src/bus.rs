//! ConfigBus subscriber.
//!
//! Notifications are best-effort: the payload is only a hint, and every
//! message triggers a full re-read of `system_config` so a lost or
//! duplicated notice never leaves a replica on a partial view. The listener
//! reconnects forever.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::sleep;

use crate::AppState;
use crate::constants::CONFIG_CHANNEL;
use crate::error::GatewayError;
use crate::syslog;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn spawn_config_listener(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = listen(&state).await {
                syslog::warn(format!("Config listener error: {e}"));
            }
            sleep(RECONNECT_DELAY).await;
        }
    });
}

async fn listen(state: &AppState) -> Result<(), GatewayError> {
    let mut pubsub = state.quota.pubsub().await?;
    pubsub.subscribe(CONFIG_CHANNEL).await?;
    tracing::info!("Subscribed to {CONFIG_CHANNEL}");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let _notice: String = message.get_payload().unwrap_or_default();
        match state.audit.load_system_config().await {
            Ok(map) => {
                state.runtime.write().await.apply(map);
                syslog::info("Config reloaded from pub/sub");
            }
            Err(e) => syslog::warn(format!("Config reload failed: {e}")),
        }
    }

    Ok(())
}
