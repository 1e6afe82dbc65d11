use bytemuck::{Pod, Zeroable};
use derive_more::Display;
use half::f16;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum DataType {
    F32,
    F16,
    U8,
    U16,
    U32,
}

impl DataType {
    /// Returns the size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
        }
    }
}

pub trait Zero {
    fn zero() -> Self;
}

pub trait One {
    fn one() -> Self;
}

macro_rules! impl_zero_one {
    ($ty:ty, $zero:expr, $one:expr) => {
        impl Zero for $ty {
            fn zero() -> Self {
                $zero
            }
        }

        impl One for $ty {
            fn one() -> Self {
                $one
            }
        }
    };
}

impl_zero_one!(f32, 0.0, 1.0);
impl_zero_one!(f16, f16::ZERO, f16::ONE);
impl_zero_one!(u8, 0, 1);
impl_zero_one!(u16, 0, 1);
impl_zero_one!(u32, 0, 1);

/// An element type tensors can be made of. Arithmetic on unsigned integers
/// wraps; the `f64` round trip is what comparators and the mixed-type
/// equality check go through.
pub trait Scalar: Sized + Zeroable + Pod + Zero + One + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn add(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn neg(self) -> Self;

    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }

    fn neg(self) -> Self {
        -self
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Scalar for f16 {
    const DATA_TYPE: DataType = DataType::F16;

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }

    fn neg(self) -> Self {
        -self
    }

    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

macro_rules! impl_scalar_uint {
    ($ty:ty, $data_type:expr) => {
        impl Scalar for $ty {
            const DATA_TYPE: DataType = $data_type;

            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            fn neg(self) -> Self {
                self.wrapping_neg()
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_scalar_uint!(u8, DataType::U8);
impl_scalar_uint!(u16, DataType::U16);
impl_scalar_uint!(u32, DataType::U32);

/// Calls `$f::<T>($args)` with `T` resolved from a runtime [`DataType`].
macro_rules! dispatch {
    ($ty:expr, $f:ident($($arg:expr),* $(,)?)) => {
        match $ty {
            $crate::num::DataType::F32 => $f::<f32>($($arg),*),
            $crate::num::DataType::F16 => $f::<::half::f16>($($arg),*),
            $crate::num::DataType::U8 => $f::<u8>($($arg),*),
            $crate::num::DataType::U16 => $f::<u16>($($arg),*),
            $crate::num::DataType::U32 => $f::<u32>($($arg),*),
        }
    };
}

pub(crate) use dispatch;
