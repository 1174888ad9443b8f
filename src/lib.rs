//! # Beckhoff ADS Protocol Library
//!
//! A Rust library for communicating with Beckhoff TwinCAT PLCs using the ADS
//! (Automation Device Specification) protocol over AMS/TCP.
//!
//! This is a **protocol-only** library: it reads, writes and subscribes to
//! PLC variables and uploads the symbol table. There is no polling,
//! scheduling, retry or reconnection logic; the application stays in
//! control of those.
//!
//! ## Features
//!
//! - **Async** - one tokio task per session; many requests in flight at once
//! - **Correlated** - responses matched by invoke id, in any order, with per-request timeouts
//! - **Typed fields** - PLC types mapped onto a [`Value`] tree through property paths
//! - **Notifications** - device samples published as [`SessionEvent`]s
//! - **Symbol upload** - symbol table and recursive datatype tree
//! - **Sum commands** - many handles read or written in one round trip
//! - **No panics** - all errors returned as `Result<T, AdsError>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use beckhoff_ads::types::{string, DINT, REAL};
//! use beckhoff_ads::{Client, ClientConfig, Handle};
//!
//! #[tokio::main]
//! async fn main() -> beckhoff_ads::Result<()> {
//!     let config = ClientConfig::new("192.168.1.20")
//!         .with_target_net_id("5.12.34.56.1.1".parse()?)
//!         .with_source_net_id("192.168.1.5.1.1".parse()?)
//!         .with_target_port(851);
//!     let client = Client::connect(config).await?;
//!
//!     // One value
//!     let mut speed = Handle::symbol("MAIN.speed").with_type(REAL);
//!     client.read(&mut speed).await?;
//!     println!("speed = {:?}", speed.get("value"));
//!
//!     // A structure split into named fields
//!     let mut motor = Handle::symbol("MAIN.motor")
//!         .with_field(DINT, "position")?
//!         .with_field(string(20), "name")?;
//!     client.read(&mut motor).await?;
//!     println!("{}", motor.values());
//!
//!     client.end().await
//! }
//! ```
//!
//! ## Data Types
//!
//! | Type | Bytes | [`Value`] |
//! |------|-------|-----------|
//! | `BOOL` | 1 | `Bool` |
//! | `BYTE`, `USINT` | 1 | `UInt` |
//! | `SINT` | 1 | `Int` |
//! | `WORD`, `UINT` | 2 | `UInt` |
//! | `INT` | 2 | `Int` |
//! | `DWORD`, `UDINT` | 4 | `UInt` |
//! | `DINT` | 4 | `Int` |
//! | `LINT` / `ULINT` | 8 | `Int` / `UInt` |
//! | `REAL` / `LREAL` | 4 / 8 | `Real` |
//! | `STRING(n)` | n + 1 | `String` |
//! | `TIME`, `TIME_OF_DAY` | 4 | `DateTime` (milliseconds) |
//! | `DATE`, `DATE_AND_TIME` | 4 | `DateTime` (seconds) |
//!
//! Date and time values are shifted by the local timezone offset unless the
//! field or the handle turns that off.
//!
//! ## Notifications
//!
//! ```no_run
//! # use beckhoff_ads::{Client, Handle, SessionEvent};
//! # async fn run(client: Client) -> beckhoff_ads::Result<()> {
//! let mut events = client.subscribe();
//! let mut flag = Handle::symbol("MAIN.flag");
//! client.notify(&mut flag).await?;
//!
//! if let Ok(SessionEvent::Notification { handle, .. }) = events.recv().await {
//!     println!("flag = {:?}", handle.get("value"));
//! }
//! client.release_notification_handle(&mut flag).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Sum Commands
//!
//! ```no_run
//! # use beckhoff_ads::types::INT;
//! # use beckhoff_ads::{Client, Handle};
//! # async fn run(client: Client) -> beckhoff_ads::Result<()> {
//! let mut handles = vec![
//!     Handle::symbol("MAIN.a").with_type(INT).with_value("value", 1)?,
//!     Handle::symbol("MAIN.b").with_type(INT).with_value("value", 2)?,
//! ];
//! client.multi_write(&mut handles).await?;
//! client.multi_read(&mut handles).await?;
//! for handle in &handles {
//!     match handle.error_as_ads() {
//!         Some(err) => println!("{:?}: {}", handle.symbol_name(), err),
//!         None => println!("{:?} = {:?}", handle.symbol_name(), handle.get("value")),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```no_run
//! # use beckhoff_ads::{AdsError, Client};
//! # async fn run(client: Client) {
//! match client.read_raw(0x4020, 0, 4).await {
//!     Ok(data) => println!("{:?}", data),
//!     Err(AdsError::Timeout { invoke_id }) => println!("request {invoke_id} timed out"),
//!     Err(AdsError::Device { code }) => println!("device error {code}"),
//!     Err(e) => println!("error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Logging
//!
//! The library logs through [`tracing`] and never installs a subscriber.
//! Frames are logged at `debug`, payloads at `trace`.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod batch;
mod client;
mod command;
mod correlation;
mod error;
mod frame;
mod handle;
mod header;
mod notification;
mod path;
pub mod response;
pub mod symbol;
pub mod transport;
pub mod types;
pub mod value;

// Public re-exports
pub use client::{Client, ClientConfig, LifecycleState, SessionEvent};
pub use command::{
    index_group, AddNotificationRequest, AdsState, CommandId, DeleteNotificationRequest,
    ReadDeviceInfoRequest, ReadRequest, ReadStateRequest, ReadWriteRequest, Request,
    TransmissionMode, WriteControlRequest, WriteRequest,
};
pub use error::{ads_error_description, AdsError, Result};
pub use frame::{AmsFrame, FrameCodec, FRAME_HEADER_SIZE, MAX_DATA_LENGTH};
pub use handle::{Field, Handle, Target, DEFAULT_CYCLE_TIME};
pub use header::{AmsAddr, AmsHeader, AmsNetId, AMS_HEADER_SIZE, TCP_HEADER_SIZE};
pub use notification::{parse_notification_samples, NotificationSample};
pub use path::{PropertyPath, Segment, MAX_BIND_INDEX};
pub use response::{DeviceInfo, DeviceState};
pub use symbol::{ArrayDim, DatatypeNode, Symbol, UploadInfo};
pub use types::{Primitive, TypeDescriptor, TypeKind};
pub use value::Value;
