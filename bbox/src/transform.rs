use crate::common::*;

/// Per-axis affine transform `y' = y * sy + ty`, `x' = x * sx + tx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num,
{
    /// Uniform scaling without translation.
    pub fn scale(factor: T) -> Self {
        Self {
            sy: factor,
            sx: factor,
            ty: T::zero(),
            tx: T::zero(),
        }
    }
}

/// A half-open range of feature grid cells, `[t, b) × [l, r)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCells {
    pub t: i64,
    pub l: i64,
    pub b: i64,
    pub r: i64,
}
