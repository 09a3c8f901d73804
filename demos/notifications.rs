//! Connects to a STOMP broker as a logged-in member and prints per-user queue traffic.
//!
//! Subscribes to the notification and chat queues, reports connection status, and keeps
//! running until Ctrl-C. Point it at a broker with `STOMP_ENDPOINT`:
//! ```sh
//! STOMP_ENDPOINT=ws://localhost:8080/ws RUST_LOG=info cargo run --example notifications
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use stomp_link::identity::{CurrentMember, MemberStore};
use stomp_link::ws::config::Config;
use stomp_link::{Client, ConnectionState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint =
        std::env::var("STOMP_ENDPOINT").unwrap_or_else(|_| "ws://localhost:8080/ws".to_owned());

    let members = Arc::new(MemberStore::new());
    members.set_current_member(CurrentMember::new(1, "demo"));

    let client = Client::new(Config::builder().endpoint(endpoint).build(), members)?;

    let mut states = Box::pin(client.state_changes());
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            match state {
                ConnectionState::Connected { .. } => info!(?state, "connection"),
                _ => warn!(?state, "connection"),
            }
        }
    });

    info!(outcome = ?client.connect(), "connect");
    if let Err(e) = client.wait_for_connection(Duration::from_secs(10)).await {
        warn!(error = %e, check = ?client.check_connection(), "still waiting for broker");
    }

    client
        .subscribe_notifications(|message| {
            info!(queue = "notifications", body = %message.body);
        })
        .await;
    client
        .subscribe_notification_count(|message| {
            info!(queue = "notification-count", count = %message.body);
        })
        .await;
    client
        .subscribe_chat_messages(|message| {
            info!(queue = "chat-messages", body = %message.body);
        })
        .await;
    client
        .subscribe_chat_unread_count(|message| {
            info!(queue = "chat-unread-count", count = %message.body);
        })
        .await;

    info!(status = %serde_json::to_string(&client.connection_status())?, "subscribed");

    tokio::signal::ctrl_c().await?;
    client.disconnect();

    Ok(())
}
