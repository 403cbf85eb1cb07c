//! Packed triangle colours
//!
//! A triangle colour is one `u32`: luma in bits 0-7, Cb in 8-15, Cr in
//! 16-23 and a validity flag in 24-31. A zero flag means "no colour yet".

pub const COLOR_VALID_FLAG: u32 = 0xFF00_0000;

/// Mid-grey, used for texels that have nothing to inherit
pub const NEUTRAL_LUMA: u8 = 128;
pub const NEUTRAL_CHROMA: [u8; 2] = [128, 128];

pub fn pack_color(luma: u8, cb: u8, cr: u8) -> u32 {
    COLOR_VALID_FLAG | (cr as u32) << 16 | (cb as u32) << 8 | luma as u32
}

pub fn has_color(color: u32) -> bool {
    color & COLOR_VALID_FLAG != 0
}

/// (luma, [cb, cr])
pub fn unpack_color(color: u32) -> (u8, [u8; 2]) {
    (
        (color & 0xFF) as u8,
        [((color >> 8) & 0xFF) as u8, ((color >> 16) & 0xFF) as u8],
    )
}

/// Running sum of valid colours
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorSum {
    pub luma: u32,
    pub cb: u32,
    pub cr: u32,
    pub count: u32,
}

pub fn accumulate_color(sum: &mut ColorSum, color: u32) {
    if !has_color(color) {
        return;
    }
    let (luma, [cb, cr]) = unpack_color(color);
    sum.luma += luma as u32;
    sum.cb += cb as u32;
    sum.cr += cr as u32;
    sum.count += 1;
}

pub fn merge_color_sums(a: ColorSum, b: ColorSum) -> ColorSum {
    ColorSum {
        luma: a.luma + b.luma,
        cb: a.cb + b.cb,
        cr: a.cr + b.cr,
        count: a.count + b.count,
    }
}

/// Average colour, None if nothing was accumulated
pub fn average_color(sum: &ColorSum) -> Option<u32> {
    if sum.count == 0 {
        return None;
    }
    let n = sum.count;
    Some(pack_color(
        ((sum.luma + n / 2) / n) as u8,
        ((sum.cb + n / 2) / n) as u8,
        ((sum.cr + n / 2) / n) as u8,
    ))
}

/// Blend `sample` into `current` with weight `alpha` (0..1)
pub fn blend_channel(current: u8, sample: u8, alpha: f32) -> u8 {
    (current as f32 + (sample as f32 - current as f32) * alpha).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let color = pack_color(10, 20, 30);
        assert!(has_color(color));
        assert_eq!(unpack_color(color), (10, [20, 30]));
        assert!(!has_color(0));
    }

    #[test]
    fn test_average_skips_uncolored() {
        let mut sum = ColorSum::default();
        accumulate_color(&mut sum, pack_color(100, 100, 100));
        accumulate_color(&mut sum, pack_color(200, 50, 150));
        accumulate_color(&mut sum, 0);
        assert_eq!(sum.count, 2);
        assert_eq!(average_color(&sum), Some(pack_color(150, 75, 125)));
        assert_eq!(average_color(&ColorSum::default()), None);
    }

    #[test]
    fn test_blend_channel() {
        assert_eq!(blend_channel(100, 200, 0.5), 150);
        assert_eq!(blend_channel(100, 200, 0.0), 100);
        assert_eq!(blend_channel(100, 200, 1.0), 200);
    }
}
