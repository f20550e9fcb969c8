pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

/// `src * a + dst * (1 - a)` on 8-bit channels, `a` in 0..=255.
pub(crate) fn lerp_u8(dst: u8, src: u8, a: u16) -> u8 {
    let inv = 255u16 - a.min(255);
    let v = mul_div255_u16(u16::from(src), a.min(255)) + mul_div255_u16(u16::from(dst), inv);
    v.min(255) as u8
}

/// Exponential moving average step. A zero `prev` seeds from `sample`.
pub(crate) fn ema(prev: f64, sample: f64, alpha: f64) -> f64 {
    if prev == 0.0 {
        sample
    } else {
        alpha * sample + (1.0 - alpha) * prev
    }
}
