// ==============================================================================
// Typed action parameters
// ==============================================================================
//
// Every action argument implements `Param`. Its `kind()` is what the
// registration-time signature check compares against the declared
// `name type` pairs, and `from_resolved` turns the coerced per-request value
// back into the concrete Rust type when the action is invoked.

use std::{fmt, str::FromStr};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bind::{BindError, de};

// ==============================================================================
// TypeTag
// ==============================================================================

/// Scalar types accepted in path segments and action declarations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// `string` → [`String`]
    Str,
    /// `int` → [`i32`]
    Int,
    /// `int64` → [`i64`]
    Int64,
    /// `uint64` → [`u64`]
    Uint64,
    /// `float64` → [`f64`]
    Float64,
    /// `bool` → [`bool`]
    Bool,
}

impl TypeTag {
    /// The tag as written in route declarations.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Int => "int",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
        }
    }

    /// Whether `:min:max` bounds may be attached to a path segment of this type.
    #[must_use]
    pub const fn is_boundable(self) -> bool {
        matches!(self, Self::Int | Self::Float64)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the scalar tags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown parameter type `{0}`")]
pub struct UnknownTypeTag(pub String);

impl FromStr for TypeTag {
    type Err = UnknownTypeTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::Str),
            "int" => Ok(Self::Int),
            "int64" => Ok(Self::Int64),
            "uint64" => Ok(Self::Uint64),
            "float64" => Ok(Self::Float64),
            "bool" => Ok(Self::Bool),
            other => Err(UnknownTypeTag(other.to_owned())),
        }
    }
}

// ==============================================================================
// Scalar / Resolved
// ==============================================================================

/// A coerced scalar value.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i32),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Bool(bool),
}

impl Scalar {
    /// The zero value of `tag`.
    #[must_use]
    pub const fn zero(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Str => Self::Str(String::new()),
            TypeTag::Int => Self::Int(0),
            TypeTag::Int64 => Self::Int64(0),
            TypeTag::Uint64 => Self::Uint64(0),
            TypeTag::Float64 => Self::Float64(0.0),
            TypeTag::Bool => Self::Bool(false),
        }
    }

    /// Coerces a raw string. Unparsable input yields the zero value of `tag`.
    #[must_use]
    pub fn parse(tag: TypeTag, raw: &str) -> Self {
        match tag {
            TypeTag::Str => Self::Str(raw.to_owned()),
            TypeTag::Int => Self::Int(raw.parse().unwrap_or_default()),
            TypeTag::Int64 => Self::Int64(raw.parse().unwrap_or_default()),
            TypeTag::Uint64 => Self::Uint64(raw.parse().unwrap_or_default()),
            TypeTag::Float64 => Self::Float64(raw.parse().unwrap_or_default()),
            TypeTag::Bool => Self::Bool(raw.parse().unwrap_or_default()),
        }
    }

    /// Coerces a decoded JSON value. Numbers are cast, strings are parsed
    /// as in [`Scalar::parse`], booleans count as `0`/`1`; anything else is
    /// the zero value.
    #[must_use]
    // Lossy casts are the coercion policy.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_json(tag: TypeTag, value: &Value) -> Self {
        match value {
            Value::String(s) => Self::parse(tag, s),
            Value::Bool(b) => match tag {
                TypeTag::Str => Self::Str(b.to_string()),
                TypeTag::Bool => Self::Bool(*b),
                TypeTag::Int => Self::Int(i32::from(*b)),
                TypeTag::Int64 => Self::Int64(i64::from(*b)),
                TypeTag::Uint64 => Self::Uint64(u64::from(*b)),
                TypeTag::Float64 => Self::Float64(f64::from(u8::from(*b))),
            },
            Value::Number(n) => {
                let float = n.as_f64().unwrap_or_default();
                let int = n.as_i64().unwrap_or(float as i64);
                match tag {
                    TypeTag::Str => Self::Str(n.to_string()),
                    TypeTag::Bool => Self::Bool(float != 0.0),
                    TypeTag::Int => Self::Int(int as i32),
                    TypeTag::Int64 => Self::Int64(int),
                    TypeTag::Uint64 => Self::Uint64(n.as_u64().unwrap_or(int as u64)),
                    TypeTag::Float64 => Self::Float64(float),
                }
            }
            Value::Null | Value::Array(_) | Value::Object(_) => Self::zero(tag),
        }
    }
}

/// A parameter value after coercion, ready to be handed to an action.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Scalar(Scalar),
    /// Synthetic key/value document a struct parameter is deserialized from.
    Struct(Value),
}

// ==============================================================================
// ParamKind / Param
// ==============================================================================

/// What an action argument expects, as seen by the signature check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Scalar(TypeTag),
    /// A struct bound from the query string and request body. Holds the
    /// unqualified type name used for suffix matching against declarations.
    Struct(&'static str),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(tag) => tag.fmt(f),
            Self::Struct(name) => f.write_str(name),
        }
    }
}

/// An argument type an action may take.
///
/// Implemented for `String`, `i32`, `i64`, `u64`, `f64`, `bool` and
/// [`Bind<T>`].
pub trait Param: Sized + Send + 'static {
    /// The kind checked against the route declaration.
    fn kind() -> ParamKind;

    /// Converts the coerced value into `Self`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] when the value has the wrong shape, or when a
    /// struct cannot be deserialized from the synthetic document.
    fn from_resolved(value: Resolved) -> Result<Self, BindError>;
}

macro_rules! scalar_param {
    ($ty:ty, $tag:ident) => {
        impl Param for $ty {
            fn kind() -> ParamKind {
                ParamKind::Scalar(TypeTag::$tag)
            }

            fn from_resolved(value: Resolved) -> Result<Self, BindError> {
                match value {
                    Resolved::Scalar(Scalar::$tag(v)) => Ok(v),
                    other => Err(BindError::unexpected(TypeTag::$tag.as_str(), &other)),
                }
            }
        }
    };
}

scalar_param!(String, Str);
scalar_param!(i32, Int);
scalar_param!(i64, Int64);
scalar_param!(u64, Uint64);
scalar_param!(f64, Float64);
scalar_param!(bool, Bool);

/// A struct argument populated from the query string, form fields, or JSON
/// body.
///
/// Declared in the action signature by its type name, optionally
/// `*`-qualified (`Create(form *UserForm)`). Fields are looked up by their
/// serde names; values that fail to parse become zero, so structs usually
/// carry `#[serde(default)]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bind<T>(pub T);

impl<T> std::ops::Deref for Bind<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> Param for Bind<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn kind() -> ParamKind {
        ParamKind::Struct(short_type_name::<T>())
    }

    fn from_resolved(value: Resolved) -> Result<Self, BindError> {
        match value {
            Resolved::Struct(doc) => de::from_value(&doc).map(Self),
            other => Err(BindError::unexpected(short_type_name::<T>(), &other)),
        }
    }
}

/// `my_app::forms::UserForm<X>` → `UserForm`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
