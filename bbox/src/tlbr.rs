use super::Rect;
use crate::{common::*, GridCells, Transform};

/// Bounding box in TLBR format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> TLBR<T>
where
    T: Copy + Num,
{
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        TLBR {
            t: self.t * transform.sy + transform.ty,
            l: self.l * transform.sx + transform.tx,
            b: self.b * transform.sy + transform.ty,
            r: self.r * transform.sx + transform.tx,
        }
    }
}

impl<T> TLBR<T>
where
    T: Float,
{
    /// Maps a box in image pixels onto the cells of a feature grid.
    ///
    /// Corners are scaled by `1 / downsample_factor` and rounded to the nearest
    /// cell. The end cell is inclusive, so a box narrower than one cell still
    /// covers exactly one cell. The result is clamped to the
    /// `grid_h × grid_w` grid.
    pub fn to_grid_cells(&self, downsample_factor: T, grid_h: i64, grid_w: i64) -> GridCells {
        let scaled = self.transform(&Transform::scale(downsample_factor.recip()));
        let round = |value: T, max: i64| -> i64 {
            let cell = value.round().to_i64().unwrap_or(0);
            cell.max(0).min(max - 1)
        };

        let t = round(scaled.t, grid_h);
        let l = round(scaled.l, grid_w);
        let b = round(scaled.b, grid_h).max(t);
        let r = round(scaled.r, grid_w).max(l);

        GridCells {
            t,
            l,
            b: b + 1,
            r: r + 1,
        }
    }
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> Self::Type {
        self.t
    }

    fn l(&self) -> Self::Type {
        self.l
    }

    fn b(&self) -> Self::Type {
        self.b
    }

    fn r(&self) -> Self::Type {
        self.r
    }

    fn cy(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.t + self.h() / two
    }

    fn cx(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.l + self.w() / two
    }

    fn h(&self) -> Self::Type {
        self.b - self.t
    }

    fn w(&self) -> Self::Type {
        self.r - self.l
    }

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self> {
        let [t, l, b, r] = tlbr;
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold");

        Ok(Self { t, l, b, r })
    }

    fn try_from_tlhw(tlhw: [Self::Type; 4]) -> Result<Self> {
        let [t, l, h, w] = tlhw;
        let b = t + h;
        let r = l + w;
        Self::try_from_tlbr([t, l, b, r])
    }
}
