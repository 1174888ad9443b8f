//! Example: Reading and writing PLC variables
//!
//! Run with: cargo run --example read_write
//!
//! Connection settings come from `ADS_HOST`, `ADS_TARGET_NET_ID`,
//! `ADS_SOURCE_NET_ID` and `ADS_TARGET_PORT`. Set `RUST_LOG=beckhoff_ads=debug`
//! to see every frame.
//!
//! This example demonstrates:
//! - Device info and state
//! - Reading and writing single values by symbol name
//! - Splitting a structure into named fields
//! - Arrays and raw index group access
//! - Sum commands over many handles

use beckhoff_ads::types::{array_of, string, BOOL, DINT, INT, LREAL, REAL, UDINT};
use beckhoff_ads::{index_group, Client, ClientConfig, Handle};
use std::env;
use tracing_subscriber::EnvFilter;

fn config() -> beckhoff_ads::Result<ClientConfig> {
    let host = env::var("ADS_HOST").unwrap_or_else(|_| "192.168.1.20".into());
    let target = env::var("ADS_TARGET_NET_ID").unwrap_or_else(|_| "192.168.1.20.1.1".into());
    let source = env::var("ADS_SOURCE_NET_ID").unwrap_or_else(|_| "192.168.1.5.1.1".into());
    let port = env::var("ADS_TARGET_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(851);
    Ok(ClientConfig::new(host)
        .with_target_net_id(target.parse()?)
        .with_source_net_id(source.parse()?)
        .with_target_port(port))
}

#[tokio::main]
async fn main() -> beckhoff_ads::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // =========================================================================
    // Connect to PLC
    // =========================================================================

    let client = Client::connect(config()?).await?;

    let info = client.read_device_info().await?;
    println!(
        "Connected to {} {}.{}.{}",
        info.device_name, info.major_version, info.minor_version, info.version_build
    );
    let state = client.read_state().await?;
    println!("ADS state: {:?} (device state {})", state.state(), state.device_state);

    // =========================================================================
    // Single Values
    // =========================================================================

    println!("\n=== Single Values ===\n");

    let mut running = Handle::symbol("MAIN.bRunning").with_type(BOOL);
    client.read(&mut running).await?;
    println!("MAIN.bRunning = {:?}", running.get("value"));

    let mut setpoint = Handle::symbol("MAIN.fSetpoint")
        .with_type(REAL)
        .with_value("value", 42.5f32)?;
    client.write(&mut setpoint).await?;
    println!("Wrote 42.5 to MAIN.fSetpoint");

    // =========================================================================
    // Structures
    // =========================================================================

    println!("\n=== Structures ===\n");

    // ST_Motor: position DINT, velocity LREAL, name STRING(20)
    let mut motor = Handle::symbol("MAIN.stMotor")
        .with_field(DINT, "position")?
        .with_field(LREAL, "velocity")?
        .with_field(string(20), "name")?;
    client.read(&mut motor).await?;
    println!("MAIN.stMotor = {}", motor.values());

    motor.set("name", "axis 1")?;
    client.write(&mut motor).await?;

    // =========================================================================
    // Arrays
    // =========================================================================

    println!("\n=== Arrays ===\n");

    let mut levels = Handle::symbol("MAIN.aLevels").with_type(array_of(INT, 0, 9));
    client.read(&mut levels).await?;
    println!("MAIN.aLevels = {}", levels.values());
    println!("MAIN.aLevels[3] = {:?}", levels.get("value[3]"));

    // =========================================================================
    // Raw Access
    // =========================================================================

    println!("\n=== Raw Access ===\n");

    let bytes = client.read_raw(0x4020, 0, 4).await?;
    println!("%MB0..3 = {:02X?}", &bytes[..]);

    let mut marker = Handle::address(0x4020, 0).with_type(UDINT);
    client.read(&mut marker).await?;
    println!("%MD0 = {:?}", marker.get("value"));

    let version = client.read_raw(index_group::SYM_VERSION, 0, 1).await?;
    println!("Symbol version: {:?}", version.first());

    // =========================================================================
    // Sum Commands (Single Request)
    // =========================================================================

    println!("\n=== Sum Commands ===\n");

    let mut handles = vec![
        Handle::symbol("MAIN.nCount").with_type(DINT),
        Handle::symbol("MAIN.fSetpoint").with_type(REAL),
        Handle::symbol("MAIN.doesNotExist").with_type(INT),
    ];
    client.multi_read(&mut handles).await?;
    for handle in &handles {
        let name = handle.symbol_name().unwrap_or("?");
        match handle.error_as_ads() {
            Some(err) => println!("{name}: {err}"),
            None => println!("{name} = {:?}", handle.get("value")),
        }
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    client.end().await?;
    println!("\nRead/write example completed!");
    Ok(())
}
