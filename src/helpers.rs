use crate::common::Color32;

/// Rounds `n` up to the next multiple of `divider` (3, 4 => 4; 5, 4 => 8).
pub fn align_up(n: u32, divider: u32) -> u32 {
    if divider == 0 {
        return n;
    }
    match n % divider {
        0 => n,
        m => n + (divider - m),
    }
}

pub fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> Color32 {
    r as u32 | (g as u32) << 8 | (b as u32) << 16 | (a as u32) << 24
}

pub fn unpack_rgba(c: Color32) -> [u8; 4] {
    [c as u8, (c >> 8) as u8, (c >> 16) as u8, (c >> 24) as u8]
}

pub fn alpha(c: Color32) -> u8 {
    (c >> 24) as u8
}

// Squared Euclidean distance over the RGB components; alpha is ignored.
pub fn rgb_distance(a: Color32, b: Color32) -> u32 {
    let [r0, g0, b0, _] = unpack_rgba(a);
    let [r1, g1, b1, _] = unpack_rgba(b);
    let d = |x: u8, y: u8| (x as i32 - y as i32).pow(2) as u32;
    d(r0, r1) + d(g0, g1) + d(b0, b1)
}
