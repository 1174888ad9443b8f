//! Example: Browsing the symbol table and type system
//!
//! Run with: cargo run --example symbols
//!
//! Connection settings come from `ADS_HOST`, `ADS_TARGET_NET_ID` and
//! `ADS_SOURCE_NET_ID`.
//!
//! This example demonstrates:
//! - Upload sizes
//! - Symbol upload, raw and with arrays expanded
//! - The datatype tree

use beckhoff_ads::{Client, ClientConfig, DatatypeNode};
use std::env;
use tracing_subscriber::EnvFilter;

fn print_datatype(node: &DatatypeNode, depth: usize) {
    let offset = node
        .offset
        .map(|o| format!(" @{o}"))
        .unwrap_or_default();
    println!(
        "{:indent$}{} : {} ({} bytes{offset})",
        "",
        node.name,
        node.type_name,
        node.size,
        indent = depth * 2
    );
    for child in &node.children {
        print_datatype(child, depth + 1);
    }
}

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
        .with_target_port(851);
    let client = Client::connect(config).await?;

    // =========================================================================
    // Upload Info
    // =========================================================================

    let info = client.upload_info().await?;
    println!(
        "{} symbols ({} bytes), {} datatypes ({} bytes)",
        info.symbol_count, info.symbol_length, info.datatype_count, info.datatype_length
    );

    // =========================================================================
    // Symbols
    // =========================================================================

    println!("\n=== Symbols ===\n");

    let raw = client.get_symbols(true).await?;
    let expanded = client.get_symbols(false).await?;
    println!("{} entries, {} after array expansion", raw.len(), expanded.len());

    for symbol in expanded.iter().take(25) {
        println!(
            "{:<40} {:<24} group 0x{:04X} offset 0x{:X} size {}",
            symbol.name, symbol.type_name, symbol.index_group, symbol.index_offset, symbol.size
        );
    }

    // =========================================================================
    // Datatypes
    // =========================================================================

    println!("\n=== Datatypes ===\n");

    let datatypes = client.get_datatypes().await?;
    for node in datatypes.iter().filter(|n| !n.children.is_empty()).take(10) {
        print_datatype(node, 0);
    }

    client.end().await?;
    Ok(())
}
