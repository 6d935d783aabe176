//! Element types and scalar casting.

use std::fmt;

/// Element type of a [`super::TypedMatrix`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ScalarType {
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 64-bit float.
    Fp64,
    /// User-defined type identified by a code; only castable to itself.
    Opaque(u32),
}

impl ScalarType {
    /// Returns true when a value of `self` may be typecast into `target`.
    pub fn castable_to(self, target: ScalarType) -> bool {
        match (self, target) {
            (ScalarType::Opaque(a), ScalarType::Opaque(b)) => a == b,
            (ScalarType::Opaque(_), _) | (_, ScalarType::Opaque(_)) => false,
            _ => true,
        }
    }

    /// The value stored in freshly materialized slots of this type.
    pub fn zero(self) -> Scalar {
        match self {
            ScalarType::Bool => Scalar::Bool(false),
            ScalarType::Int64 => Scalar::Int64(0),
            ScalarType::UInt64 => Scalar::UInt64(0),
            ScalarType::Fp64 => Scalar::Fp64(0.0),
            ScalarType::Opaque(code) => Scalar::Opaque { code, bits: 0 },
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Int64 => write!(f, "int64"),
            ScalarType::UInt64 => write!(f, "uint64"),
            ScalarType::Fp64 => write!(f, "fp64"),
            ScalarType::Opaque(code) => write!(f, "opaque#{code}"),
        }
    }
}

/// A single matrix element.
#[derive(Copy, Clone, Debug)]
pub enum Scalar {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int64(i64),
    /// Unsigned integer value.
    UInt64(u64),
    /// Floating-point value.
    Fp64(f64),
    /// Raw payload of a user-defined type.
    Opaque {
        /// Type code.
        code: u32,
        /// Payload bits.
        bits: u64,
    },
}

impl Scalar {
    /// Type of this value.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalar::Bool(_) => ScalarType::Bool,
            Scalar::Int64(_) => ScalarType::Int64,
            Scalar::UInt64(_) => ScalarType::UInt64,
            Scalar::Fp64(_) => ScalarType::Fp64,
            Scalar::Opaque { code, .. } => ScalarType::Opaque(*code),
        }
    }

    /// Typecasts into `target`, or returns `None` when the domains are incompatible.
    pub fn cast(self, target: ScalarType) -> Option<Scalar> {
        if !self.scalar_type().castable_to(target) {
            return None;
        }
        let cast = match target {
            ScalarType::Bool => Scalar::Bool(self.as_bool()),
            ScalarType::Int64 => Scalar::Int64(match self {
                Scalar::Bool(b) => b as i64,
                Scalar::Int64(v) => v,
                Scalar::UInt64(v) => v as i64,
                Scalar::Fp64(v) => v as i64,
                Scalar::Opaque { bits, .. } => bits as i64,
            }),
            ScalarType::UInt64 => Scalar::UInt64(match self {
                Scalar::Bool(b) => b as u64,
                Scalar::Int64(v) => v as u64,
                Scalar::UInt64(v) => v,
                Scalar::Fp64(v) => v as u64,
                Scalar::Opaque { bits, .. } => bits,
            }),
            ScalarType::Fp64 => Scalar::Fp64(self.as_f64()),
            ScalarType::Opaque(code) => match self {
                Scalar::Opaque { bits, .. } => Scalar::Opaque { code, bits },
                _ => return None,
            },
        };
        Some(cast)
    }

    /// Bitwise equality; distinguishes `-0.0` from `0.0` and treats equal NaN payloads as equal.
    pub fn same_bits(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int64(a), Scalar::Int64(b)) => a == b,
            (Scalar::UInt64(a), Scalar::UInt64(b)) => a == b,
            (Scalar::Fp64(a), Scalar::Fp64(b)) => a.to_bits() == b.to_bits(),
            (
                Scalar::Opaque { code: ca, bits: a },
                Scalar::Opaque { code: cb, bits: b },
            ) => ca == cb && a == b,
            _ => false,
        }
    }

    /// Truthiness used by the boolean semiring.
    pub fn as_bool(&self) -> bool {
        match *self {
            Scalar::Bool(b) => b,
            Scalar::Int64(v) => v != 0,
            Scalar::UInt64(v) => v != 0,
            Scalar::Fp64(v) => v != 0.0,
            Scalar::Opaque { bits, .. } => bits != 0,
        }
    }

    /// Numeric view used by arithmetic operators.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Bool(b) => b as u8 as f64,
            Scalar::Int64(v) => v as f64,
            Scalar::UInt64(v) => v as f64,
            Scalar::Fp64(v) => v,
            Scalar::Opaque { bits, .. } => bits as f64,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.same_bits(other)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int64(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::UInt64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Fp64(value)
    }
}

/// Binary operator combining a new value with an existing entry or an earlier
/// pending tuple at the same position.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum DupOp {
    /// Keep the newer value (plain assignment).
    #[default]
    Second,
    /// Keep the older value.
    First,
    /// Sum.
    Plus,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Logical or.
    LOr,
}

impl DupOp {
    /// Applies the operator in the domain `ty`. Both inputs must already be of type `ty`.
    pub fn apply(self, ty: ScalarType, old: Scalar, new: Scalar) -> Scalar {
        match self {
            DupOp::Second => new,
            DupOp::First => old,
            DupOp::LOr => Scalar::Bool(old.as_bool() || new.as_bool())
                .cast(ty)
                .unwrap_or(new),
            DupOp::Plus => match (old, new) {
                (Scalar::Int64(a), Scalar::Int64(b)) => Scalar::Int64(a.wrapping_add(b)),
                (Scalar::UInt64(a), Scalar::UInt64(b)) => Scalar::UInt64(a.wrapping_add(b)),
                (Scalar::Fp64(a), Scalar::Fp64(b)) => Scalar::Fp64(a + b),
                (Scalar::Bool(a), Scalar::Bool(b)) => Scalar::Bool(a || b),
                _ => new,
            },
            DupOp::Min => match (old, new) {
                (Scalar::Int64(a), Scalar::Int64(b)) => Scalar::Int64(a.min(b)),
                (Scalar::UInt64(a), Scalar::UInt64(b)) => Scalar::UInt64(a.min(b)),
                (Scalar::Fp64(a), Scalar::Fp64(b)) => Scalar::Fp64(a.min(b)),
                (Scalar::Bool(a), Scalar::Bool(b)) => Scalar::Bool(a && b),
                _ => new,
            },
            DupOp::Max => match (old, new) {
                (Scalar::Int64(a), Scalar::Int64(b)) => Scalar::Int64(a.max(b)),
                (Scalar::UInt64(a), Scalar::UInt64(b)) => Scalar::UInt64(a.max(b)),
                (Scalar::Fp64(a), Scalar::Fp64(b)) => Scalar::Fp64(a.max(b)),
                (Scalar::Bool(a), Scalar::Bool(b)) => Scalar::Bool(a || b),
                _ => new,
            },
        }
    }
}
