//! PLC type descriptors.
//!
//! A [`TypeDescriptor`] says how many bytes one field of a handle occupies
//! and how to convert them. Descriptors are plain immutable values: every
//! factory returns a fresh record.
//!
//! # Primitive Types
//!
//! | Name | Bytes | Value |
//! |------|------:|-------|
//! | `BOOL` | 1 | `Bool` |
//! | `BYTE`, `USINT` | 1 | `UInt` |
//! | `SINT` | 1 | `Int` |
//! | `WORD`, `UINT` | 2 | `UInt` |
//! | `INT` | 2 | `Int` |
//! | `DWORD`, `UDINT` | 4 | `UInt` |
//! | `DINT` | 4 | `Int` |
//! | `LINT` | 8 | `Int` |
//! | `ULINT` | 8 | `UInt` |
//! | `REAL` | 4 | `Real` |
//! | `LREAL` | 8 | `Real` |
//! | `TIME`, `TIME_OF_DAY`, `TOD` | 4 | `DateTime`, milliseconds since epoch |
//! | `DATE`, `DATE_AND_TIME`, `DT` | 4 | `DateTime`, seconds since epoch |
//! | `STRING` | 81 | `String`, NUL-terminated latin-1 |
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::types::{self, array_of, string, INT};
//!
//! assert_eq!(string(20).length(), 21);
//! let arr = array_of(INT, 1, 10);
//! assert_eq!(arr.byte_length(), 20);
//! assert_eq!(types::make_type("LREAL").length(), 8);
//! ```

use std::fmt;

/// PLC primitive types understood by the value codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Primitive {
    Bool,
    Byte,
    Word,
    Dword,
    Sint,
    Usint,
    Int,
    Uint,
    Dint,
    Udint,
    Lint,
    Ulint,
    Real,
    Lreal,
    Time,
    TimeOfDay,
    Tod,
    Date,
    DateAndTime,
    Dt,
    String,
}

impl Primitive {
    /// Looks up a primitive by its PLC name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "BOOL" => Self::Bool,
            "BYTE" => Self::Byte,
            "WORD" => Self::Word,
            "DWORD" => Self::Dword,
            "SINT" => Self::Sint,
            "USINT" => Self::Usint,
            "INT" => Self::Int,
            "UINT" => Self::Uint,
            "DINT" => Self::Dint,
            "UDINT" => Self::Udint,
            "LINT" => Self::Lint,
            "ULINT" => Self::Ulint,
            "REAL" => Self::Real,
            "LREAL" => Self::Lreal,
            "TIME" => Self::Time,
            "TIME_OF_DAY" => Self::TimeOfDay,
            "TOD" => Self::Tod,
            "DATE" => Self::Date,
            "DATE_AND_TIME" => Self::DateAndTime,
            "DT" => Self::Dt,
            "STRING" => Self::String,
            _ => return None,
        })
    }

    /// Returns the PLC name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
            Self::Dword => "DWORD",
            Self::Sint => "SINT",
            Self::Usint => "USINT",
            Self::Int => "INT",
            Self::Uint => "UINT",
            Self::Dint => "DINT",
            Self::Udint => "UDINT",
            Self::Lint => "LINT",
            Self::Ulint => "ULINT",
            Self::Real => "REAL",
            Self::Lreal => "LREAL",
            Self::Time => "TIME",
            Self::TimeOfDay => "TIME_OF_DAY",
            Self::Tod => "TOD",
            Self::Date => "DATE",
            Self::DateAndTime => "DATE_AND_TIME",
            Self::Dt => "DT",
            Self::String => "STRING",
        }
    }

    /// Returns the default width in bytes.
    pub const fn length(self) -> usize {
        match self {
            Self::Bool | Self::Byte | Self::Sint | Self::Usint => 1,
            Self::Word | Self::Int | Self::Uint => 2,
            Self::Dword
            | Self::Dint
            | Self::Udint
            | Self::Real
            | Self::Time
            | Self::TimeOfDay
            | Self::Tod
            | Self::Date
            | Self::DateAndTime
            | Self::Dt => 4,
            Self::Lint | Self::Ulint | Self::Lreal => 8,
            Self::String => 81,
        }
    }

    /// Returns whether the type carries a timestamp.
    pub const fn is_date_time(self) -> bool {
        matches!(
            self,
            Self::Time
                | Self::TimeOfDay
                | Self::Tod
                | Self::Date
                | Self::DateAndTime
                | Self::Dt
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the bytes of a field are converted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Known primitive.
    Primitive(Primitive),
    /// Named type without a codec; decodes to `Value::Null`.
    Unknown(String),
    /// Untyped bytes, kept as `Value::Bytes`.
    Raw,
}

/// Layout of one handle field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    kind: TypeKind,
    length: usize,
    array: Option<(i32, i32)>,
    use_local_timezone: Option<bool>,
}

impl TypeDescriptor {
    /// Descriptor for a primitive at its default width.
    pub const fn primitive(primitive: Primitive) -> Self {
        Self {
            kind: TypeKind::Primitive(primitive),
            length: primitive.length(),
            array: None,
            use_local_timezone: None,
        }
    }

    /// Descriptor for `length` untyped bytes.
    pub const fn raw(length: usize) -> Self {
        Self {
            kind: TypeKind::Raw,
            length,
            array: None,
            use_local_timezone: None,
        }
    }

    /// Returns the kind.
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Returns the primitive, if any.
    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the type name (`""` for raw fields).
    pub fn name(&self) -> &str {
        match &self.kind {
            TypeKind::Primitive(p) => p.name(),
            TypeKind::Unknown(name) => name,
            TypeKind::Raw => "",
        }
    }

    /// Width of one item in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Array bounds, if this is an array descriptor.
    pub fn array_bounds(&self) -> Option<(i32, i32)> {
        self.array
    }

    /// Number of items (1 for scalars).
    pub fn item_count(&self) -> usize {
        match self.array {
            Some((low, high)) => (i64::from(high) - i64::from(low) + 1) as usize,
            None => 1,
        }
    }

    /// Total bytes occupied: item width times item count.
    pub fn byte_length(&self) -> usize {
        self.length * self.item_count()
    }

    /// Explicit timezone setting of this descriptor.
    pub fn use_local_timezone(&self) -> Option<bool> {
        self.use_local_timezone
    }

    /// Returns a copy expanded to the array `[low..high]`.
    ///
    /// Bounds with `low > high` leave the descriptor unchanged.
    pub fn array(&self, low: i32, high: i32) -> Self {
        let mut t = self.clone();
        if low <= high {
            t.array = Some((low, high));
        }
        t
    }

    /// Returns a copy with an explicit timezone setting.
    pub fn with_local_timezone(&self, use_local: bool) -> Self {
        let mut t = self.clone();
        t.use_local_timezone = Some(use_local);
        t
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.kind {
            TypeKind::Raw => "BYTES",
            _ => self.name(),
        };
        match self.array {
            Some((low, high)) => write!(f, "ARRAY [{low}..{high}] OF {name}({})", self.length),
            None => write!(f, "{name}({})", self.length),
        }
    }
}

/// Descriptor for a named type.
///
/// Names outside the primitive table produce a zero-width descriptor that
/// decodes to `Value::Null`.
pub fn make_type(name: &str) -> TypeDescriptor {
    match Primitive::from_name(name) {
        Some(p) => TypeDescriptor::primitive(p),
        None => TypeDescriptor {
            kind: TypeKind::Unknown(name.to_owned()),
            length: 0,
            array: None,
            use_local_timezone: None,
        },
    }
}

/// `STRING(n)`: `n` characters plus the terminating NUL.
pub fn string(chars: usize) -> TypeDescriptor {
    TypeDescriptor {
        length: chars + 1,
        ..TypeDescriptor::primitive(Primitive::String)
    }
}

/// `ARRAY [low..high] OF t`.
pub fn array_of(t: TypeDescriptor, low: i32, high: i32) -> TypeDescriptor {
    t.array(low, high)
}

/// Copy of `t` with an explicit timezone setting.
pub fn with_local_timezone(t: TypeDescriptor, use_local: bool) -> TypeDescriptor {
    t.with_local_timezone(use_local)
}

macro_rules! primitive_consts {
    ($($name:ident => $variant:ident),* $(,)?) => {
        $(
            #[doc = concat!("`", stringify!($name), "` at its default width.")]
            pub const $name: TypeDescriptor = TypeDescriptor::primitive(Primitive::$variant);
        )*
    };
}

primitive_consts! {
    BOOL => Bool,
    BYTE => Byte,
    WORD => Word,
    DWORD => Dword,
    SINT => Sint,
    USINT => Usint,
    INT => Int,
    UINT => Uint,
    DINT => Dint,
    UDINT => Udint,
    LINT => Lint,
    ULINT => Ulint,
    REAL => Real,
    LREAL => Lreal,
    TIME => Time,
    TIME_OF_DAY => TimeOfDay,
    TOD => Tod,
    DATE => Date,
    DATE_AND_TIME => DateAndTime,
    DT => Dt,
    STRING => String,
}
