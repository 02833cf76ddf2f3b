/// Value Coercion Module
///
/// Turns raw SQLite values into statically typed scalars. A database NULL
/// always becomes the target's default value; anything else goes through a
/// per-type conversion that either succeeds exactly or reports a
/// `ConversionError`.
use crate::core::error::ConversionError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;

/// A scalar type that can be produced from a raw database value.
///
/// Implementors only handle non-NULL input; NULL handling lives in [`coerce`].
/// Enumerations implement this through [`coerce_enum!`](crate::coerce_enum).
pub trait Coerce: Sized + Default {
    /// Converts a non-NULL raw value.
    fn coerce_from(value: ValueRef<'_>) -> Result<Self, ConversionError>;
}

/// Coerces a raw value into `T`, mapping NULL to `T::default()`.
///
/// # Examples
///
/// ```
/// use sqlbase::{coerce, ValueRef};
///
/// assert_eq!(coerce::<i64>(ValueRef::Null).unwrap(), 0);
/// assert_eq!(coerce::<i64>(ValueRef::Text(b"42")).unwrap(), 42);
/// ```
pub fn coerce<T: Coerce>(value: ValueRef<'_>) -> Result<T, ConversionError> {
    match value {
        ValueRef::Null => Ok(T::default()),
        other => T::coerce_from(other),
    }
}

fn kind_name(value: ValueRef<'_>) -> &'static str {
    match value {
        ValueRef::Null => "NULL",
        ValueRef::Integer(_) => "INTEGER",
        ValueRef::Real(_) => "REAL",
        ValueRef::Text(_) => "TEXT",
        ValueRef::Blob(_) => "BLOB",
    }
}

fn unsupported(value: ValueRef<'_>, target: &'static str) -> ConversionError {
    ConversionError::Unsupported {
        kind: kind_name(value),
        target,
    }
}

fn text<'a>(bytes: &'a [u8], target: &'static str) -> Result<&'a str, ConversionError> {
    std::str::from_utf8(bytes).map_err(|_| ConversionError::Parse {
        value: String::from_utf8_lossy(bytes).into_owned(),
        target,
    })
}

/// Rounds half to even before narrowing, the usual rule for REAL to integer.
fn real_to_i128(f: f64, target: &'static str) -> Result<i128, ConversionError> {
    let rounded = f.round_ties_even();
    if !rounded.is_finite() || rounded.abs() >= 1e20 {
        return Err(ConversionError::Overflow {
            value: f.to_string(),
            target,
        });
    }
    Ok(rounded as i128)
}

macro_rules! coerce_integer {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Coerce for $t {
                fn coerce_from(value: ValueRef<'_>) -> Result<Self, ConversionError> {
                    const TARGET: &str = stringify!($t);
                    match value {
                        ValueRef::Integer(i) => <$t>::try_from(i).map_err(|_| ConversionError::Overflow {
                            value: i.to_string(),
                            target: TARGET,
                        }),
                        ValueRef::Real(f) => {
                            let wide = real_to_i128(f, TARGET)?;
                            <$t>::try_from(wide).map_err(|_| ConversionError::Overflow {
                                value: f.to_string(),
                                target: TARGET,
                            })
                        }
                        ValueRef::Text(bytes) => {
                            let s = text(bytes, TARGET)?.trim();
                            s.parse::<$t>().map_err(|e| match e.kind() {
                                std::num::IntErrorKind::PosOverflow
                                | std::num::IntErrorKind::NegOverflow => ConversionError::Overflow {
                                    value: s.to_string(),
                                    target: TARGET,
                                },
                                _ => ConversionError::Parse {
                                    value: s.to_string(),
                                    target: TARGET,
                                },
                            })
                        }
                        other => Err(unsupported(other, TARGET)),
                    }
                }
            }
        )+
    };
}

coerce_integer!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! coerce_float {
    ($($t:ty),+ $(,)?) => {
        $(
            impl Coerce for $t {
                fn coerce_from(value: ValueRef<'_>) -> Result<Self, ConversionError> {
                    const TARGET: &str = stringify!($t);
                    match value {
                        ValueRef::Integer(i) => Ok(i as $t),
                        ValueRef::Real(f) => {
                            let narrowed = f as $t;
                            if f.is_finite() && !narrowed.is_finite() {
                                return Err(ConversionError::Overflow {
                                    value: f.to_string(),
                                    target: TARGET,
                                });
                            }
                            Ok(narrowed)
                        }
                        ValueRef::Text(bytes) => {
                            let s = text(bytes, TARGET)?.trim();
                            let parsed = s.parse::<$t>().map_err(|_| ConversionError::Parse {
                                value: s.to_string(),
                                target: TARGET,
                            })?;
                            // "1e400" parses to infinity rather than failing
                            if !parsed.is_finite() {
                                return Err(ConversionError::Overflow {
                                    value: s.to_string(),
                                    target: TARGET,
                                });
                            }
                            Ok(parsed)
                        }
                        other => Err(unsupported(other, TARGET)),
                    }
                }
            }
        )+
    };
}

coerce_float!(f32, f64);

impl Coerce for bool {
    fn coerce_from(value: ValueRef<'_>) -> Result<Self, ConversionError> {
        match value {
            ValueRef::Integer(i) => Ok(i != 0),
            ValueRef::Real(f) => Ok(f != 0.0),
            ValueRef::Text(bytes) => {
                let s = text(bytes, "bool")?.trim();
                if s.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if s.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(ConversionError::Parse {
                        value: s.to_string(),
                        target: "bool",
                    })
                }
            }
            other => Err(unsupported(other, "bool")),
        }
    }
}

impl Coerce for String {
    fn coerce_from(value: ValueRef<'_>) -> Result<Self, ConversionError> {
        match value {
            ValueRef::Integer(i) => Ok(i.to_string()),
            ValueRef::Real(f) => Ok(f.to_string()),
            ValueRef::Text(bytes) => text(bytes, "String").map(str::to_owned),
            other => Err(unsupported(other, "String")),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// INTEGER dates are Unix seconds, as produced by strftime('%s').
fn from_unix(secs: i64, target: &'static str) -> Result<NaiveDateTime, ConversionError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or(ConversionError::Overflow {
            value: secs.to_string(),
            target,
        })
}

impl Coerce for NaiveDateTime {
    fn coerce_from(value: ValueRef<'_>) -> Result<Self, ConversionError> {
        const TARGET: &str = "NaiveDateTime";
        match value {
            ValueRef::Integer(secs) => from_unix(secs, TARGET),
            ValueRef::Text(bytes) => {
                let s = text(bytes, TARGET)?.trim();
                parse_datetime(s).ok_or_else(|| ConversionError::Parse {
                    value: s.to_string(),
                    target: TARGET,
                })
            }
            other => Err(unsupported(other, TARGET)),
        }
    }
}

impl Coerce for NaiveDate {
    fn coerce_from(value: ValueRef<'_>) -> Result<Self, ConversionError> {
        const TARGET: &str = "NaiveDate";
        match value {
            ValueRef::Integer(secs) => from_unix(secs, TARGET).map(|dt| dt.date()),
            ValueRef::Text(bytes) => {
                let s = text(bytes, TARGET)?.trim();
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .or_else(|| parse_datetime(s).map(|dt| dt.date()))
                    .ok_or_else(|| ConversionError::Parse {
                        value: s.to_string(),
                        target: TARGET,
                    })
            }
            other => Err(unsupported(other, TARGET)),
        }
    }
}

/// Implements [`Coerce`] for enumerations stored as integers.
///
/// The raw value is first coerced to `i32`, then mapped through the type's
/// `TryFrom<i32>` impl. The type must also implement `Default`, which is what
/// a NULL column yields.
///
/// ```
/// use sqlbase::{coerce, coerce_enum, ValueRef};
///
/// #[derive(Debug, Default, PartialEq)]
/// enum Status {
///     #[default]
///     Draft,
///     Published,
/// }
///
/// impl TryFrom<i32> for Status {
///     type Error = ();
///     fn try_from(v: i32) -> Result<Self, ()> {
///         match v {
///             0 => Ok(Status::Draft),
///             1 => Ok(Status::Published),
///             _ => Err(()),
///         }
///     }
/// }
///
/// coerce_enum!(Status);
///
/// assert_eq!(coerce::<Status>(ValueRef::Integer(1)).unwrap(), Status::Published);
/// assert_eq!(coerce::<Status>(ValueRef::Null).unwrap(), Status::Draft);
/// ```
#[macro_export]
macro_rules! coerce_enum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Coerce for $ty {
                fn coerce_from(
                    value: $crate::ValueRef<'_>,
                ) -> ::std::result::Result<Self, $crate::ConversionError> {
                    let discriminant = <i32 as $crate::Coerce>::coerce_from(value)?;
                    <$ty as ::std::convert::TryFrom<i32>>::try_from(discriminant).map_err(|_| {
                        $crate::ConversionError::UnknownVariant {
                            discriminant,
                            target: stringify!($ty),
                        }
                    })
                }
            }
        )+
    };
}
