//! High-level ADS client for communicating with Beckhoff PLCs.
//!
//! This module provides the [`Client`] struct, the primary interface for
//! talking to a TwinCAT runtime over ADS/AMS.
//!
//! # Overview
//!
//! The client handles:
//! - frame construction and invoke id assignment
//! - request/response correlation with per-request timeouts
//! - symbol handle resolution, caching and release
//! - device notifications, published as [`SessionEvent::Notification`]
//! - symbol and datatype uploads
//! - sum commands for reading and writing many handles in one round trip
//!
//! # Example
//!
//! ```no_run
//! use beckhoff_ads::types::{INT, REAL};
//! use beckhoff_ads::{Client, ClientConfig, Handle};
//!
//! # async fn run() -> beckhoff_ads::Result<()> {
//! let config = ClientConfig::new("192.168.1.20")
//!     .with_target_net_id("5.12.34.56.1.1".parse()?)
//!     .with_source_net_id("192.168.1.5.1.1".parse()?)
//!     .with_target_port(851);
//! let client = Client::connect(config).await?;
//!
//! let info = client.read_device_info().await?;
//! println!("{} {}.{}", info.device_name, info.major_version, info.minor_version);
//!
//! let mut speed = Handle::symbol("MAIN.speed").with_type(REAL);
//! client.read(&mut speed).await?;
//!
//! let mut count = Handle::symbol("MAIN.count").with_type(INT).with_value("value", 42)?;
//! client.write(&mut count).await?;
//!
//! client.end().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! [`ClientConfig`] carries the router host and TCP port, the target and
//! source AMS addresses, and the request and connect timeouts. Host and both
//! net ids are required; everything else has a protocol default.
//!
//! # Thread Safety
//!
//! All operations take `&self`, so a client can be shared behind an `Arc`
//! and used from many tasks. Requests never block each other; responses may
//! arrive in any order and are matched by invoke id.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::batch;
use crate::command::{
    describe_command, index_group, AddNotificationRequest, AdsState, CommandId,
    DeleteNotificationRequest, ReadDeviceInfoRequest, ReadRequest, ReadStateRequest,
    ReadWriteRequest, Request, WriteControlRequest, WriteRequest,
};
use crate::correlation::{CorrelationTable, Resolution};
use crate::error::{check_code, AdsError, Result};
use crate::frame::{AmsFrame, FrameCodec};
use crate::handle::Handle;
use crate::header::{AmsAddr, AmsNetId};
use crate::notification::NotificationManager;
use crate::response::{
    parse_device_info, parse_device_state, parse_notification_handle, parse_read_data,
    parse_result, DeviceInfo, DeviceState,
};
use crate::symbol::{parse_datatypes, parse_symbols, DatatypeNode, Symbol, UploadInfo, UPLOAD_INFO_LENGTH};
use crate::transport::{
    self, DEFAULT_ADS_TCP_PORT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SOURCE_PORT, DEFAULT_TARGET_PORT,
    DEFAULT_TIMEOUT,
};

const REQUEST_QUEUE_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 1024;
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

/// Configuration for creating an ADS client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Host name or IP address of the AMS router.
    pub host: String,
    /// TCP port of the AMS router.
    pub port: u16,
    /// AMS net id of the target device.
    pub target_net_id: Option<AmsNetId>,
    /// AMS net id of this client.
    pub source_net_id: Option<AmsNetId>,
    /// AMS port of the target runtime.
    pub target_port: u16,
    /// AMS port of this client.
    pub source_port: u16,
    /// Timeout of a single request.
    pub timeout: Duration,
    /// Timeout of the TCP connect.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for the router at `host` with default ports
    /// and timeouts.
    ///
    /// Both net ids must still be set before connecting.
    ///
    /// # Example
    ///
    /// ```
    /// use beckhoff_ads::ClientConfig;
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::new("192.168.1.20");
    /// assert_eq!(config.port, 48898);
    /// assert_eq!(config.target_port, 801);
    /// assert_eq!(config.source_port, 32905);
    /// assert_eq!(config.timeout, Duration::from_millis(500));
    /// assert!(config.validate().is_err());
    /// ```
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_ADS_TCP_PORT,
            target_net_id: None,
            source_net_id: None,
            target_port: DEFAULT_TARGET_PORT,
            source_port: DEFAULT_SOURCE_PORT,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the target AMS net id.
    pub fn with_target_net_id(mut self, net_id: AmsNetId) -> Self {
        self.target_net_id = Some(net_id);
        self
    }

    /// Sets the source AMS net id.
    pub fn with_source_net_id(mut self, net_id: AmsNetId) -> Self {
        self.source_net_id = Some(net_id);
        self
    }

    /// Sets the router TCP port (default 48898).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the target AMS port (default 801).
    ///
    /// # Example
    ///
    /// ```
    /// use beckhoff_ads::ClientConfig;
    ///
    /// let config = ClientConfig::new("plc").with_target_port(851);
    /// assert_eq!(config.target_port, 851);
    /// ```
    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = port;
        self
    }

    /// Sets the source AMS port (default 32905).
    pub fn with_source_port(mut self, port: u16) -> Self {
        self.source_port = port;
        self
    }

    /// Sets the request timeout (default 500 ms).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the TCP connect timeout (default 5 s).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Checks that the host and both net ids are present.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidConfig` naming the first missing setting.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AdsError::invalid_config("host is required"));
        }
        if self.target_net_id.is_none() {
            return Err(AdsError::invalid_config("target net id is required"));
        }
        if self.source_net_id.is_none() {
            return Err(AdsError::invalid_config("source net id is required"));
        }
        Ok(())
    }

    fn addresses(&self) -> Result<(AmsAddr, AmsAddr)> {
        self.validate()?;
        match (self.target_net_id, self.source_net_id) {
            (Some(target), Some(source)) => Ok((
                AmsAddr::new(target, self.target_port),
                AmsAddr::new(source, self.source_port),
            )),
            _ => Err(AdsError::invalid_config("net ids are required")),
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not started.
    Idle,
    /// Connected and accepting requests.
    Active,
    /// `end()` is releasing device resources.
    Closing,
    /// Closed by the client.
    Closed,
    /// Ended by a transport error or a protocol fault.
    Failed,
}

/// Events published by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Lifecycle changed.
    LifecycleChanged(LifecycleState),
    /// A subscribed handle received a new sample.
    Notification {
        /// Snapshot of the handle with the decoded sample bound.
        handle: Box<Handle>,
        /// Raw 64-bit sample timestamp.
        timestamp: u64,
    },
    /// An inbound frame header carried a nonzero ADS error code.
    AdsError {
        /// ADS error code.
        code: u32,
    },
    /// The peer violated the protocol; the session is ending.
    Fault {
        /// What went wrong.
        reason: String,
    },
    /// Socket error or disconnect.
    TransportError {
        /// What went wrong.
        reason: String,
    },
}

/// A frame on its way to the driver.
#[derive(Debug)]
struct SessionRequest {
    frame: AmsFrame,
    timeout: Duration,
    response_tx: oneshot::Sender<Result<AmsFrame>>,
}

/// State shared between the client and its driver task.
#[derive(Debug)]
struct Shared {
    notifications: Mutex<NotificationManager>,
    symbol_handles: Mutex<Vec<u32>>,
    closing: AtomicBool,
    events_tx: broadcast::Sender<SessionEvent>,
    lifecycle_tx: watch::Sender<LifecycleState>,
}

impl Shared {
    fn publish(&self, state: LifecycleState) {
        self.lifecycle_tx.send_replace(state);
        let _ = self.events_tx.send(SessionEvent::LifecycleChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// ADS client session.
///
/// Each operation sends one request, or one sum request for the batch
/// operations, and waits for its response. A symbolic handle costs one
/// extra round trip the first time it is used; the symbol handle is cached
/// on the [`Handle`] and released by [`Client::end`].
///
/// # Example
///
/// ```no_run
/// use beckhoff_ads::{Client, ClientConfig, SessionEvent, Handle, TransmissionMode};
/// use beckhoff_ads::types::DINT;
/// use std::time::Duration;
///
/// # async fn run(config: ClientConfig) -> beckhoff_ads::Result<()> {
/// let client = Client::connect(config).await?;
/// let mut events = client.subscribe();
///
/// let mut counter = Handle::symbol("MAIN.counter")
///     .with_type(DINT)
///     .with_transmission_mode(TransmissionMode::Cyclic)
///     .with_cycle_time(Duration::from_millis(100));
/// client.notify(&mut counter).await?;
///
/// while let Ok(event) = events.recv().await {
///     if let SessionEvent::Notification { handle, .. } = event {
///         println!("{:?}", handle.get("value"));
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    target: AmsAddr,
    source: AmsAddr,
    invoke_id: AtomicU32,
    request_tx: mpsc::Sender<SessionRequest>,
    lifecycle_rx: watch::Receiver<LifecycleState>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Validates `config`, connects to the router and starts the session.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidConfig` before any socket is opened if the
    /// configuration is incomplete, and `AdsError::Io` if the connect fails.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let stream = transport::connect(&config.host, config.port, config.connect_timeout).await?;
        Self::with_stream(config, stream)
    }

    /// Starts a session over an already connected byte stream.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidConfig` if the configuration is incomplete.
    pub fn with_stream<S>(config: ClientConfig, stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (target, source) = config.addresses()?;
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (lifecycle_tx, lifecycle_rx) = watch::channel(LifecycleState::Idle);
        let shared = Arc::new(Shared {
            notifications: Mutex::new(NotificationManager::new()),
            symbol_handles: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
            events_tx,
            lifecycle_tx,
        });
        let cancel = CancellationToken::new();

        shared.publish(LifecycleState::Active);
        debug!(%target, %source, "session started");
        let framed = Framed::new(stream, FrameCodec::new());
        let driver = tokio::spawn(run_driver(
            framed,
            request_rx,
            Arc::clone(&shared),
            cancel.child_token(),
        ));

        Ok(Self {
            config,
            target,
            source,
            invoke_id: AtomicU32::new(0),
            request_tx,
            lifecycle_rx,
            shared,
            cancel,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Returns a lifecycle watch receiver.
    pub fn lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle_rx.clone()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.lifecycle_rx.borrow()
    }

    /// Whether the session accepts requests.
    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active && !self.shared.closing.load(Ordering::Acquire)
    }

    fn next_invoke_id(&self) -> u32 {
        self.invoke_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Sends one frame and waits for its response payload.
    async fn transact(&self, command: CommandId, payload: Bytes) -> Result<Bytes> {
        let invoke_id = self.next_invoke_id();
        let frame = AmsFrame::request(self.target, self.source, command as u16, invoke_id, payload);
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(SessionRequest {
                frame,
                timeout: self.config.timeout,
                response_tx,
            })
            .await
            .map_err(|_| AdsError::NotConnected)?;

        let response = response_rx.await.map_err(|_| AdsError::ConnectionClosed)??;
        check_code(response.header.error_code)?;
        if response.command_id() != command as u16 {
            return Err(AdsError::decode(format!(
                "response command {} does not match request command {}",
                response.command_id(),
                command as u16
            )));
        }
        Ok(response.payload)
    }

    async fn command<R: Request>(&self, request: &R) -> Result<Bytes> {
        if !self.is_active() {
            return Err(AdsError::NotConnected);
        }
        self.transact(R::COMMAND, request.to_bytes()).await
    }

    /// Reads the device name and version.
    pub async fn read_device_info(&self) -> Result<DeviceInfo> {
        let payload = self.command(&ReadDeviceInfoRequest).await?;
        parse_device_info(&payload)
    }

    /// Reads the ADS state and device state.
    pub async fn read_state(&self) -> Result<DeviceState> {
        let payload = self.command(&ReadStateRequest).await?;
        parse_device_state(&payload)
    }

    /// Requests an ADS state change, e.g. [`AdsState::Run`] or [`AdsState::Stop`].
    pub async fn write_control(
        &self,
        ads_state: AdsState,
        device_state: u16,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let request = WriteControlRequest {
            ads_state: ads_state as u16,
            device_state,
            data: data.into(),
        };
        let payload = self.command(&request).await?;
        parse_result(&payload)
    }

    /// Reads `length` bytes at an index group and offset.
    pub async fn read_raw(&self, index_group: u32, index_offset: u32, length: u32) -> Result<Bytes> {
        let payload = self
            .command(&ReadRequest::new(index_group, index_offset, length))
            .await?;
        parse_read_data(&payload)
    }

    /// Writes bytes at an index group and offset.
    pub async fn write_raw(&self, index_group: u32, index_offset: u32, data: impl Into<Bytes>) -> Result<()> {
        let payload = self
            .command(&WriteRequest::new(index_group, index_offset, data))
            .await?;
        parse_result(&payload)
    }

    /// Writes bytes and reads up to `read_length` bytes back in one request.
    pub async fn write_read(
        &self,
        index_group: u32,
        index_offset: u32,
        data: impl Into<Bytes>,
        read_length: u32,
    ) -> Result<Bytes> {
        let request = ReadWriteRequest::new(index_group, index_offset, read_length, data);
        let payload = self.command(&request).await?;
        parse_read_data(&payload)
    }

    /// Resolves the symbol handle of a symbolic handle, once.
    async fn resolve_symbol_handle(&self, handle: &mut Handle) -> Result<()> {
        if !handle.needs_symbol_handle() {
            return Ok(());
        }
        let name = handle.symbol_name().map(batch::nul_terminated).unwrap_or_default();
        let data = self
            .write_read(index_group::GET_SYMHANDLE_BYNAME, 0, name, 4)
            .await?;
        let raw: [u8; 4] = data
            .as_ref()
            .try_into()
            .map_err(|_| AdsError::decode(format!("symbol handle of {} bytes", data.len())))?;
        let symbol_handle = u32::from_le_bytes(raw);
        handle.set_symbol_handle(Some(symbol_handle));
        lock(&self.shared.symbol_handles).push(symbol_handle);
        Ok(())
    }

    async fn data_address(&self, handle: &mut Handle) -> Result<(u32, u32)> {
        self.resolve_symbol_handle(handle).await?;
        handle
            .data_address()
            .ok_or_else(|| AdsError::invalid_parameter("handle", "no data address"))
    }

    fn byte_length(handle: &Handle) -> Result<u32> {
        u32::try_from(handle.byte_length())
            .map_err(|_| AdsError::invalid_parameter("handle", "byte length exceeds 32 bits"))
    }

    /// Reads a handle's bytes and binds them to its fields.
    pub async fn read(&self, handle: &mut Handle) -> Result<()> {
        let (group, offset) = self.data_address(handle).await?;
        let data = self.read_raw(group, offset, Self::byte_length(handle)?).await?;
        handle.decode_into(&data);
        Ok(())
    }

    /// Writes a handle's bound values.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::MissingValue` if a field has no value.
    pub async fn write(&self, handle: &mut Handle) -> Result<()> {
        let data = handle.encode()?;
        let (group, offset) = self.data_address(handle).await?;
        self.write_raw(group, offset, data).await
    }

    /// Subscribes to device notifications for a handle.
    ///
    /// Samples arrive as [`SessionEvent::Notification`]. The subscription is
    /// deleted by [`Client::release_notification_handle`] or [`Client::end`].
    pub async fn notify(&self, handle: &mut Handle) -> Result<()> {
        let (index_group, index_offset) = self.data_address(handle).await?;
        let request = AddNotificationRequest {
            index_group,
            index_offset,
            length: Self::byte_length(handle)?,
            mode: handle.transmission_mode(),
            max_delay: handle.max_delay(),
            cycle_time: handle.cycle_time(),
        };
        let payload = self.command(&request).await?;
        let notification_handle = parse_notification_handle(&payload)?;
        handle.set_notification_handle(Some(notification_handle));
        lock(&self.shared.notifications).register(notification_handle, handle.clone());
        debug!(notification_handle, "notification added");
        Ok(())
    }

    async fn delete_notification(&self, notification_handle: u32) -> Result<()> {
        let request = DeleteNotificationRequest {
            notification_handle,
        };
        let result = self
            .transact(CommandId::DeleteNotification, request.to_bytes())
            .await
            .and_then(|payload| parse_result(&payload));
        lock(&self.shared.notifications).remove(notification_handle);
        result
    }

    /// Deletes the subscription of one handle.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidParameter` if the handle is not subscribed.
    pub async fn release_notification_handle(&self, handle: &mut Handle) -> Result<()> {
        if !self.is_active() {
            return Err(AdsError::NotConnected);
        }
        let notification_handle = handle
            .notification_handle()
            .ok_or_else(|| AdsError::invalid_parameter("handle", "not subscribed"))?;
        handle.set_notification_handle(None);
        self.delete_notification(notification_handle).await
    }

    /// Deletes every active subscription, one at a time.
    ///
    /// All deletions are attempted; the first error is returned.
    pub async fn release_notification_handles(&self) -> Result<()> {
        if !self.is_active() {
            return Err(AdsError::NotConnected);
        }
        self.release_all_notifications().await
    }

    async fn release_all_notifications(&self) -> Result<()> {
        let pending = lock(&self.shared.notifications).pending_release();
        let mut first_error = None;
        for notification_handle in pending {
            if let Err(err) = self.delete_notification(notification_handle).await {
                warn!(notification_handle, error = %err, "failed to delete notification");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn release_symbol_handles(&self) {
        let handles = std::mem::take(&mut *lock(&self.shared.symbol_handles));
        for symbol_handle in handles {
            let request = WriteRequest::new(
                index_group::RELEASE_SYMHANDLE,
                0,
                Bytes::copy_from_slice(&symbol_handle.to_le_bytes()),
            );
            let result = self
                .transact(CommandId::Write, request.to_bytes())
                .await
                .and_then(|payload| parse_result(&payload));
            if let Err(err) = result {
                warn!(symbol_handle, error = %err, "failed to release symbol handle");
            }
        }
    }

    /// Reads the symbol and datatype upload sizes.
    pub async fn upload_info(&self) -> Result<UploadInfo> {
        let data = self
            .read_raw(index_group::SYM_UPLOADINFO2, 0, UPLOAD_INFO_LENGTH)
            .await?;
        UploadInfo::parse(&data)
    }

    /// Uploads the symbol table.
    ///
    /// Array symbols expand into one entry per element unless `raw` is set.
    pub async fn get_symbols(&self, raw: bool) -> Result<Vec<Symbol>> {
        let info = self.upload_info().await?;
        let blob = self
            .read_raw(index_group::SYM_UPLOAD, 0, info.symbol_length)
            .await?;
        parse_symbols(&blob, raw)
    }

    /// Uploads the datatype tree.
    pub async fn get_datatypes(&self) -> Result<Vec<DatatypeNode>> {
        let info = self.upload_info().await?;
        let blob = self
            .read_raw(index_group::SYM_DT_UPLOAD, 0, info.datatype_length)
            .await?;
        parse_datatypes(&blob)
    }

    /// Resolves the symbol handles of all unresolved symbolic handles in one
    /// sum request.
    ///
    /// Names the device cannot resolve leave their handle unresolved with
    /// [`Handle::error`] set.
    pub async fn get_handles(&self, handles: &mut [Handle]) -> Result<()> {
        let Some(batch) = batch::get_handles_request(handles)? else {
            return Ok(());
        };
        let request = batch.request;
        let data = self
            .write_read(request.index_group, request.index_offset, request.data, request.read_length)
            .await?;
        let mut released = lock(&self.shared.symbol_handles);
        batch::apply_get_handles(handles, &batch.indices, &data, &mut released)
    }

    /// Reads many handles with one sum request.
    ///
    /// Per-handle failures are reported through [`Handle::error`]; handles
    /// whose symbol did not resolve are left out of the request.
    pub async fn multi_read(&self, handles: &mut [Handle]) -> Result<()> {
        for handle in handles.iter_mut() {
            handle.set_error(None);
        }
        self.get_handles(handles).await?;
        let Some(batch) = batch::multi_read_request(handles)? else {
            return Ok(());
        };
        let request = batch.request;
        let data = self
            .write_read(request.index_group, request.index_offset, request.data, request.read_length)
            .await?;
        batch::apply_multi_read(handles, &batch.indices, &data)
    }

    /// Writes many handles with one sum request.
    ///
    /// Per-handle failures are reported through [`Handle::error`]; handles
    /// whose symbol did not resolve are left out of the request.
    pub async fn multi_write(&self, handles: &mut [Handle]) -> Result<()> {
        for handle in handles.iter_mut() {
            handle.set_error(None);
        }
        self.get_handles(handles).await?;
        let Some(batch) = batch::multi_write_request(handles)? else {
            return Ok(());
        };
        let request = batch.request;
        let data = self
            .write_read(request.index_group, request.index_offset, request.data, request.read_length)
            .await?;
        batch::apply_multi_write(handles, &batch.indices, &data)
    }

    /// Closes the session.
    ///
    /// New requests are refused and notifications are no longer published.
    /// While the connection is up, every cached symbol handle and then every
    /// subscription is released, one request at a time. The transport is
    /// closed last; requests still pending fail with
    /// `AdsError::ConnectionClosed`.
    pub async fn end(&self) -> Result<()> {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.state() == LifecycleState::Active {
            self.shared.publish(LifecycleState::Closing);
            self.release_symbol_handles().await;
            if let Err(err) = self.release_all_notifications().await {
                debug!(error = %err, "notification release incomplete");
            }
        } else {
            debug!("transport already down, skipping release");
        }

        self.cancel.cancel();
        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            if let Err(err) = driver.await {
                warn!(error = %err, "session driver ended abnormally");
            }
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why the driver loop stopped.
enum Exit {
    Cancelled,
    ClientGone,
    Transport(String),
    Fault(String),
}

/// Owns the transport and the correlation table until cancelled or failed.
async fn run_driver<S>(
    framed: Framed<S, FrameCodec>,
    mut request_rx: mpsc::Receiver<SessionRequest>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = framed.split();
    let mut table = CorrelationTable::new();
    let mut deadline_sleep = Box::pin(sleep(IDLE_SLEEP));

    let exit = loop {
        let next = table
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + IDLE_SLEEP);
        deadline_sleep.as_mut().reset(next);

        tokio::select! {
            _ = cancel.cancelled() => break Exit::Cancelled,
            request = request_rx.recv() => {
                let Some(request) = request else {
                    break Exit::ClientGone;
                };
                let invoke_id = request.frame.invoke_id();
                let command_id = request.frame.command_id();
                let deadline = Instant::now() + request.timeout;
                if !table.register(invoke_id, request.response_tx, deadline) {
                    continue;
                }
                debug!(command = describe_command(command_id), invoke_id, "sending");
                trace!(invoke_id, payload = ?&request.frame.payload[..], "request payload");
                if let Err(err) = sink.send(request.frame).await {
                    let reason = err.to_string();
                    table.fail(invoke_id, err);
                    break Exit::Transport(reason);
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(frame)) => {
                        if let Err(reason) = handle_inbound(frame, &mut table, &shared) {
                            break Exit::Fault(reason);
                        }
                    }
                    Some(Err(err)) => break Exit::Transport(err.to_string()),
                    None => break Exit::Transport("connection closed by peer".to_owned()),
                }
            }
            _ = &mut deadline_sleep => {
                for invoke_id in table.expire_due(Instant::now()) {
                    warn!(invoke_id, "request timed out");
                }
            }
        }
    };

    request_rx.close();
    table.fail_all(|| AdsError::ConnectionClosed);
    while let Ok(request) = request_rx.try_recv() {
        let _ = request.response_tx.send(Err(AdsError::ConnectionClosed));
    }

    let state = match exit {
        Exit::Cancelled | Exit::ClientGone => LifecycleState::Closed,
        Exit::Transport(reason) if shared.closing.load(Ordering::Acquire) => {
            debug!(%reason, "transport closed during shutdown");
            LifecycleState::Closed
        }
        Exit::Transport(reason) => {
            warn!(%reason, "transport error");
            shared.emit(SessionEvent::TransportError { reason });
            LifecycleState::Failed
        }
        Exit::Fault(reason) => {
            shared.emit(SessionEvent::Fault { reason });
            LifecycleState::Failed
        }
    };
    shared.publish(state);
    debug!(?state, "session driver stopped");
}

/// Routes one inbound frame. Returns the fault reason if the session must end.
fn handle_inbound(
    frame: AmsFrame,
    table: &mut CorrelationTable,
    shared: &Shared,
) -> std::result::Result<(), String> {
    let invoke_id = frame.invoke_id();
    let command_id = frame.command_id();
    debug!(command = describe_command(command_id), invoke_id, "receiving");
    trace!(invoke_id, payload = ?&frame.payload[..], "response payload");

    if frame.header.error_code != 0 {
        shared.emit(SessionEvent::AdsError {
            code: frame.header.error_code,
        });
    }

    if frame.is_notification() {
        if shared.closing.load(Ordering::Acquire) {
            return Ok(());
        }
        let updated = lock(&shared.notifications).dispatch(&frame.payload);
        match updated {
            Ok(updated) => {
                for (handle, timestamp) in updated {
                    shared.emit(SessionEvent::Notification {
                        handle: Box::new(handle),
                        timestamp,
                    });
                }
            }
            Err(err) => warn!(error = %err, "dropping malformed notification"),
        }
        return Ok(());
    }

    match table.resolve(frame) {
        Ok(Resolution::Delivered) => Ok(()),
        Ok(Resolution::Late) => {
            debug!(invoke_id, "ignoring response after timeout");
            Ok(())
        }
        Err(err) => {
            error!(invoke_id, command_id, "response without a pending request");
            Err(err.to_string())
        }
    }
}
