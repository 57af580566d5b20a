//! Desktop-space rectangle math shared by the move-rect and dirty-rect
//! replay paths. Everything here is pure so the rotation tables can be
//! verified without a GPU.

/// Half-open rectangle in desktop coordinates. The virtual desktop union
/// may place origins at negative coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_point_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            left: x,
            top: y,
            right: x + width,
            bottom: y + height,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// Display rotation as reported by the output. `DXGI_MODE_ROTATION_UNSPECIFIED`
/// is folded into `Identity` at the conversion boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub fn inverse(self) -> Self {
        match self {
            Self::Identity => Self::Identity,
            Self::Rotate90 => Self::Rotate270,
            Self::Rotate180 => Self::Rotate180,
            Self::Rotate270 => Self::Rotate90,
        }
    }
}

/// Remaps a rectangle from the duplication texture's unrotated space into
/// the output's desktop-oriented space. `width` and `height` are the
/// extents of the TARGET (rotated) space, so a 90/270 remap of a `w x h`
/// texture is called with `width = h, height = w`.
///
/// Both halves of a move rect and every dirty-rect destination go through
/// this one function.
pub fn remap_rect(rect: Rect, rotation: Rotation, width: i32, height: i32) -> Rect {
    match rotation {
        Rotation::Identity => rect,
        Rotation::Rotate90 => Rect {
            left: width - rect.bottom,
            top: rect.left,
            right: width - rect.top,
            bottom: rect.right,
        },
        Rotation::Rotate180 => Rect {
            left: width - rect.right,
            top: height - rect.bottom,
            right: width - rect.left,
            bottom: height - rect.top,
        },
        Rotation::Rotate270 => Rect {
            left: rect.top,
            top: height - rect.right,
            right: rect.bottom,
            bottom: height - rect.left,
        },
    }
}

/// Grows `bounds` to cover `other`. Used to accumulate the desktop union
/// across outputs.
pub fn union_rect(bounds: Rect, other: Rect) -> Rect {
    Rect {
        left: bounds.left.min(other.left),
        top: bounds.top.min(other.top),
        right: bounds.right.max(other.right),
        bottom: bounds.bottom.max(other.bottom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEX_W: i32 = 1920;
    const TEX_H: i32 = 1080;

    /// Target-space extents for a remap out of a TEX_W x TEX_H texture.
    fn rotated_extent(rotation: Rotation) -> (i32, i32) {
        match rotation {
            Rotation::Identity | Rotation::Rotate180 => (TEX_W, TEX_H),
            Rotation::Rotate90 | Rotation::Rotate270 => (TEX_H, TEX_W),
        }
    }

    #[test]
    fn identity_is_a_no_op() {
        let rect = Rect::new(10, 20, 300, 400);
        assert_eq!(remap_rect(rect, Rotation::Identity, TEX_W, TEX_H), rect);
    }

    #[test]
    fn full_texture_maps_onto_full_rotated_extent() {
        let full = Rect::new(0, 0, TEX_W, TEX_H);
        for rotation in [
            Rotation::Identity,
            Rotation::Rotate90,
            Rotation::Rotate180,
            Rotation::Rotate270,
        ] {
            let (w, h) = rotated_extent(rotation);
            assert_eq!(
                remap_rect(full, rotation, w, h),
                Rect::new(0, 0, w, h),
                "{rotation:?}"
            );
        }
    }

    #[test]
    fn rotate_90_moves_top_left_to_top_right() {
        // A small rect hugging the texture's top-left corner ends up at the
        // top-right of the 90-degree desktop space.
        let rect = Rect::new(0, 0, 10, 20);
        let mapped = remap_rect(rect, Rotation::Rotate90, TEX_H, TEX_W);
        assert_eq!(mapped, Rect::new(TEX_H - 20, 0, TEX_H, 10));
    }

    #[test]
    fn rotate_180_reflects_both_axes() {
        let rect = Rect::new(100, 200, 110, 220);
        let mapped = remap_rect(rect, Rotation::Rotate180, TEX_W, TEX_H);
        assert_eq!(
            mapped,
            Rect::new(TEX_W - 110, TEX_H - 220, TEX_W - 100, TEX_H - 200)
        );
    }

    #[test]
    fn inverse_rotation_round_trips() {
        let rect = Rect::new(37, 91, 411, 652);
        for rotation in [
            Rotation::Identity,
            Rotation::Rotate90,
            Rotation::Rotate180,
            Rotation::Rotate270,
        ] {
            let (w, h) = rotated_extent(rotation);
            let forward = remap_rect(rect, rotation, w, h);
            let back = remap_rect(forward, rotation.inverse(), TEX_W, TEX_H);
            assert_eq!(back, rect, "{rotation:?}");
        }
    }

    #[test]
    fn remap_preserves_area() {
        let rect = Rect::new(5, 7, 105, 57);
        for rotation in [Rotation::Rotate90, Rotation::Rotate270] {
            let (w, h) = rotated_extent(rotation);
            let mapped = remap_rect(rect, rotation, w, h);
            assert_eq!(mapped.width() * mapped.height(), rect.width() * rect.height());
            assert!(!mapped.is_empty());
        }
    }

    #[test]
    fn move_source_and_destination_use_the_same_mapping() {
        // A move of a 40x30 block: the source rect built from the source
        // point plus the destination's dimensions remaps with the exact
        // same function and extents as the destination rect itself.
        let dest = Rect::new(200, 100, 240, 130);
        let src = Rect::from_point_size(50, 60, dest.width(), dest.height());
        let (w, h) = (TEX_H, TEX_W);
        let mapped_src = remap_rect(src, Rotation::Rotate90, w, h);
        let mapped_dest = remap_rect(dest, Rotation::Rotate90, w, h);
        assert_eq!(mapped_src.width(), mapped_dest.width());
        assert_eq!(mapped_src.height(), mapped_dest.height());
    }

    #[test]
    fn union_accumulates_negative_origins() {
        let a = Rect::new(-1920, 0, 0, 1080);
        let b = Rect::new(0, -120, 2560, 1440);
        let u = union_rect(a, b);
        assert_eq!(u, Rect::new(-1920, -120, 2560, 1440));
    }
}
