//! Example: Subscribing to device notifications
//!
//! Run with: cargo run --example notifications
//!
//! Connection settings come from `ADS_HOST`, `ADS_TARGET_NET_ID` and
//! `ADS_SOURCE_NET_ID`. Press Ctrl+C to stop; the subscriptions and symbol
//! handles are released before the connection closes.
//!
//! This example demonstrates:
//! - On-change and cyclic subscriptions
//! - Consuming session events
//! - Orderly teardown

use beckhoff_ads::types::{DINT, LREAL};
use beckhoff_ads::{Client, ClientConfig, Handle, LifecycleState, SessionEvent, TransmissionMode};
use std::env;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> beckhoff_ads::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = env::var("ADS_HOST").unwrap_or_else(|_| "192.168.1.20".into());
    let target = env::var("ADS_TARGET_NET_ID").unwrap_or_else(|_| "192.168.1.20.1.1".into());
    let source = env::var("ADS_SOURCE_NET_ID").unwrap_or_else(|_| "192.168.1.5.1.1".into());
    let config = ClientConfig::new(host)
        .with_target_net_id(target.parse()?)
        .with_source_net_id(source.parse()?)
        .with_target_port(851)
        .with_timeout(Duration::from_secs(2));
    let client = Client::connect(config).await?;
    let mut events = client.subscribe();

    // =========================================================================
    // Subscriptions
    // =========================================================================

    let mut counter = Handle::symbol("MAIN.nCount").with_type(DINT);
    client.notify(&mut counter).await?;

    let mut position = Handle::symbol("MAIN.fPosition")
        .with_type(LREAL)
        .with_transmission_mode(TransmissionMode::Cyclic)
        .with_cycle_time(Duration::from_millis(250))
        .with_max_delay(Duration::from_millis(500));
    client.notify(&mut position).await?;

    println!("Subscribed, waiting for samples...");

    // =========================================================================
    // Event Loop
    // =========================================================================

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Notification { handle, timestamp }) => {
                    println!(
                        "[{timestamp}] {} = {:?}",
                        handle.symbol_name().unwrap_or("?"),
                        handle.get("value")
                    );
                }
                Ok(SessionEvent::AdsError { code }) => println!("device reported error {code}"),
                Ok(SessionEvent::LifecycleChanged(LifecycleState::Failed)) => {
                    println!("session failed");
                    return Ok(());
                }
                Ok(SessionEvent::Fault { reason } | SessionEvent::TransportError { reason }) => {
                    println!("session ending: {reason}");
                }
                Ok(SessionEvent::LifecycleChanged(_)) => {}
                Err(RecvError::Lagged(skipped)) => println!("skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    client.release_notification_handle(&mut counter).await?;
    client.end().await?;
    println!("\nNotification example completed!");
    Ok(())
}
