use num::ToPrimitive;

/// Node scalars in whatever integer or float type the data arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueArray {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            ValueArray::I8($v) => $body,
            ValueArray::I16($v) => $body,
            ValueArray::I32($v) => $body,
            ValueArray::I64($v) => $body,
            ValueArray::U8($v) => $body,
            ValueArray::U16($v) => $body,
            ValueArray::U32($v) => $body,
            ValueArray::U64($v) => $body,
            ValueArray::F32($v) => $body,
            ValueArray::F64($v) => $body,
        }
    };
}

macro_rules! impl_from_vec {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<Vec<$ty>> for ValueArray {
                fn from(v: Vec<$ty>) -> Self {
                    ValueArray::$variant(v)
                }
            }
        )*
    };
}

impl_from_vec!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64
);

fn min_max_of<T: ToPrimitive + Copy>(values: &[T]) -> Option<(f64, f64)> {
    values.iter()
        .filter_map(|v| v.to_f64())
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

impl ValueArray {
    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value `i` widened to f64. Panics if `i` is out of bounds.
    pub fn value(&self, i: usize) -> f64 {
        dispatch!(self, v => v[i].to_f64().unwrap_or(0.0))
    }

    pub fn min_max(&self) -> Option<(f64, f64)> {
        dispatch!(self, v => min_max_of(v))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ValueArray::I8(_) => "i8",
            ValueArray::I16(_) => "i16",
            ValueArray::I32(_) => "i32",
            ValueArray::I64(_) => "i64",
            ValueArray::U8(_) => "u8",
            ValueArray::U16(_) => "u16",
            ValueArray::U32(_) => "u32",
            ValueArray::U64(_) => "u64",
            ValueArray::F32(_) => "f32",
            ValueArray::F64(_) => "f64",
        }
    }
}

/// Inclusive scalar range used to map raw values into [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// `(v - min) / (max - min)`; a zero-width range maps everything to 0.
    pub fn normalize(&self, v: f64) -> f32 {
        let width = self.width();
        if width > 0.0 {
            ((v - self.min) / width) as f32
        } else {
            0.0
        }
    }
}
