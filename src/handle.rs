//! Client handles: what to read, write or subscribe to, and where the bytes go.
//!
//! A [`Handle`] names a PLC variable, either by symbol name or by raw index
//! group and offset, and lists the fields its bytes are split into. Each
//! field is a [`TypeDescriptor`] bound to a [`PropertyPath`] in the handle's
//! value tree. Fields are laid out back to back; an array descriptor
//! occupies `item_count` consecutive items bound at `path[0]`, `path[1]`, ...
//!
//! Defaults follow the ADS client conventions:
//!
//! | Setting | Default |
//! |---------|---------|
//! | fields | one `BOOL` at `value` |
//! | several types, no paths | `value[0]`, `value[1]`, ... |
//! | transmission mode | on change |
//! | max delay | 0 |
//! | cycle time | 10 ms |
//! | local timezone | on |
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::types::{array_of, INT, REAL};
//! use beckhoff_ads::{Handle, Value};
//!
//! let mut handle = Handle::symbol("MAIN.axis")
//!     .with_field(REAL, "position")?
//!     .with_field(array_of(INT, 1, 3), "flags")?;
//! assert_eq!(handle.byte_length(), 10);
//!
//! handle.decode_into(&[0, 0, 0xC0, 0x3F, 1, 0, 2, 0, 3, 0]);
//! assert_eq!(handle.get("position"), Some(&Value::Real(1.5)));
//! assert_eq!(handle.get("flags[2]"), Some(&Value::Int(3)));
//! # Ok::<(), beckhoff_ads::AdsError>(())
//! ```

use std::time::Duration;

use tracing::debug;

use crate::command::{index_group, TransmissionMode};
use crate::error::{AdsError, Result};
use crate::path::PropertyPath;
use crate::types::{TypeDescriptor, BOOL};
use crate::value::{decode, encode, Value};

/// Default notification cycle time.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(10);

/// Where a handle's data lives on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// PLC symbol, resolved to a symbol handle before first use.
    Symbol(String),
    /// Raw index group and offset.
    Address {
        /// Index group.
        index_group: u32,
        /// Index offset.
        index_offset: u32,
    },
}

/// One typed field of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Layout of the field.
    pub ty: TypeDescriptor,
    /// Where the decoded value is bound.
    pub path: PropertyPath,
}

/// Client-side description of one PLC variable and its last known values.
#[derive(Debug, Clone)]
pub struct Handle {
    target: Target,
    fields: Vec<Field>,
    explicit_fields: bool,
    values: Value,
    transmission_mode: TransmissionMode,
    max_delay: Duration,
    cycle_time: Duration,
    use_local_timezone: Option<bool>,
    symbol_handle: Option<u32>,
    notification_handle: Option<u32>,
    error: Option<u32>,
}

fn value_path() -> PropertyPath {
    PropertyPath::name("value")
}

impl Handle {
    fn new(target: Target) -> Self {
        Self {
            target,
            fields: vec![Field {
                ty: BOOL,
                path: value_path(),
            }],
            explicit_fields: false,
            values: Value::object(),
            transmission_mode: TransmissionMode::default(),
            max_delay: Duration::ZERO,
            cycle_time: DEFAULT_CYCLE_TIME,
            use_local_timezone: None,
            symbol_handle: None,
            notification_handle: None,
            error: None,
        }
    }

    /// Handle for a named PLC symbol.
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::new(Target::Symbol(name.into()))
    }

    /// Handle for a raw index group and offset.
    pub fn address(index_group: u32, index_offset: u32) -> Self {
        Self::new(Target::Address {
            index_group,
            index_offset,
        })
    }

    /// Replaces the fields with one field of type `ty` at `value`.
    pub fn with_type(mut self, ty: TypeDescriptor) -> Self {
        self.fields = vec![Field {
            ty,
            path: value_path(),
        }];
        self.explicit_fields = true;
        self
    }

    /// Replaces the fields with `types` bound at `value[0]`, `value[1]`, ...
    pub fn with_types(mut self, types: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        let base = value_path();
        self.fields = types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| Field {
                ty,
                path: base.with_index(i),
            })
            .collect();
        self.explicit_fields = true;
        self
    }

    /// Appends a field of type `ty` bound at `path`.
    ///
    /// The first call replaces the default `BOOL` field.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidPath` if `path` does not parse.
    pub fn with_field(mut self, ty: TypeDescriptor, path: &str) -> Result<Self> {
        let path = PropertyPath::parse(path)?;
        if !self.explicit_fields {
            self.fields.clear();
            self.explicit_fields = true;
        }
        self.fields.push(Field { ty, path });
        Ok(self)
    }

    /// Sets the notification transmission mode.
    pub fn with_transmission_mode(mut self, mode: TransmissionMode) -> Self {
        self.transmission_mode = mode;
        self
    }

    /// Sets the longest time the device may delay a notification.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the notification cycle time.
    pub fn with_cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    /// Sets the timezone default for date and time fields of this handle.
    pub fn with_local_timezone(mut self, use_local: bool) -> Self {
        self.use_local_timezone = Some(use_local);
        self
    }

    /// Sets the value at `path` and returns the handle.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidPath` if `path` does not parse.
    pub fn with_value(mut self, path: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(path, value)?;
        Ok(self)
    }

    /// Sets the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidPath` if `path` does not parse or indexes
    /// past [`MAX_BIND_INDEX`](crate::MAX_BIND_INDEX).
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        PropertyPath::parse(path)?.bind(&mut self.values, Some(value.into()))
    }

    /// Returns the value at `path`, if bound.
    pub fn get(&self, path: &str) -> Option<&Value> {
        PropertyPath::parse(path)
            .ok()
            .and_then(|path| path.resolve(&self.values))
    }

    /// Returns the whole value tree.
    pub fn values(&self) -> &Value {
        &self.values
    }

    /// Returns the target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the symbol name for symbolic handles.
    pub fn symbol_name(&self) -> Option<&str> {
        match &self.target {
            Target::Symbol(name) => Some(name),
            Target::Address { .. } => None,
        }
    }

    /// Returns the fields.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the notification transmission mode.
    pub fn transmission_mode(&self) -> TransmissionMode {
        self.transmission_mode
    }

    /// Returns the notification max delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the notification cycle time.
    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    /// Returns the resolved symbol handle.
    pub fn symbol_handle(&self) -> Option<u32> {
        self.symbol_handle
    }

    /// Returns the device notification handle while subscribed.
    pub fn notification_handle(&self) -> Option<u32> {
        self.notification_handle
    }

    /// Returns the ADS error of the last batch operation on this handle.
    pub fn error(&self) -> Option<u32> {
        self.error
    }

    /// Returns the ADS error of the last batch operation as an `AdsError`.
    pub fn error_as_ads(&self) -> Option<AdsError> {
        self.error.and_then(AdsError::from_code)
    }

    pub(crate) fn set_symbol_handle(&mut self, handle: Option<u32>) {
        self.symbol_handle = handle;
    }

    pub(crate) fn set_notification_handle(&mut self, handle: Option<u32>) {
        self.notification_handle = handle;
    }

    pub(crate) fn set_error(&mut self, code: Option<u32>) {
        self.error = code.filter(|&c| c != 0);
    }

    /// Whether the handle still needs a symbol handle from the device.
    pub(crate) fn needs_symbol_handle(&self) -> bool {
        matches!(self.target, Target::Symbol(_)) && self.symbol_handle.is_none()
    }

    /// Index group and offset used for data access.
    ///
    /// Symbolic handles use their symbol handle under `RW_SYMVAL_BYHANDLE`
    /// and return `None` until it is resolved.
    pub fn data_address(&self) -> Option<(u32, u32)> {
        match self.target {
            Target::Address {
                index_group,
                index_offset,
            } => Some((index_group, index_offset)),
            Target::Symbol(_) => self
                .symbol_handle
                .map(|h| (index_group::RW_SYMVAL_BYHANDLE, h)),
        }
    }

    /// Total bytes of all fields.
    pub fn byte_length(&self) -> usize {
        self.fields.iter().map(|f| f.ty.byte_length()).sum()
    }

    fn use_local_timezone_for(&self, field: &Field) -> bool {
        field
            .ty
            .use_local_timezone()
            .or(self.use_local_timezone)
            .unwrap_or(true)
    }

    /// Splits `data` into the fields and binds each decoded item.
    ///
    /// Items past the end of `data` are bound as `Value::Null`.
    pub fn decode_into(&mut self, data: &[u8]) {
        let mut offset = 0;
        let mut bound = Vec::new();
        for field in &self.fields {
            let use_local = self.use_local_timezone_for(field);
            let is_array = field.ty.array_bounds().is_some();
            for idx in 0..field.ty.item_count() {
                let path = if is_array {
                    field.path.with_index(idx)
                } else {
                    field.path.clone()
                };
                bound.push((path, decode(&field.ty, data, offset, use_local)));
                offset += field.ty.length();
            }
        }
        for (path, value) in bound {
            if let Err(e) = path.bind(&mut self.values, Some(value)) {
                debug!(path = %path, error = %e, "remaining items not bound");
                break;
            }
        }
    }

    /// Serializes the bound values of every field.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::MissingValue` if a field has no value bound and
    /// `AdsError::InvalidParameter` if a value does not fit its type.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.byte_length()];
        let mut offset = 0;
        for field in &self.fields {
            let use_local = self.use_local_timezone_for(field);
            let is_array = field.ty.array_bounds().is_some();
            for idx in 0..field.ty.item_count() {
                let path = if is_array {
                    field.path.with_index(idx)
                } else {
                    field.path.clone()
                };
                let value = path
                    .resolve(&self.values)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| AdsError::MissingValue {
                        path: path.to_string(),
                    })?;
                encode(&field.ty, value, &mut buf, offset, use_local)?;
                offset += field.ty.length();
            }
        }
        Ok(buf)
    }
}
