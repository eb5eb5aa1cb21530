//! Saturating sample arithmetic shared by mixing and volume control.

/// Add two samples, clamping to the `i16` range.
pub fn saturated_add(a: i16, b: i16) -> i16 {
    a.saturating_add(b)
}

/// Subtract `b` from `a`, clamping to the `i16` range.
pub fn saturated_subtract(a: i16, b: i16) -> i16 {
    a.saturating_sub(b)
}

/// Multiply a sample by an integer gain, clamping to the `i16` range.
pub fn saturated_multiply(sample: i16, factor: i32) -> i16 {
    clamp(sample as i64 * factor as i64)
}

/// Divide a sample by an integer attenuation.
///
/// A divisor of zero leaves the sample untouched.
pub fn saturated_divide(sample: i16, divisor: i32) -> i16 {
    if divisor == 0 {
        return sample;
    }
    clamp(sample as i64 / divisor as i64)
}

/// Add `src` into `dst` sample by sample.
///
/// Only the overlapping prefix of the two slices is touched.
pub fn add_into(dst: &mut [i16], src: &[i16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = saturated_add(*d, *s);
    }
}

/// Subtract `src` from `dst` sample by sample.
pub fn subtract_from(dst: &mut [i16], src: &[i16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = saturated_subtract(*d, *s);
    }
}

/// Add `src` into a wide accumulator, leaving clamping to the reader.
pub fn accumulate(dst: &mut [i32], src: &[i16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s as i32;
    }
}

/// Fill `out` with `total` minus `own`, clamped once to the `i16` range.
///
/// # Arguments
///
/// * `total` - Unclamped sum of every contribution.
/// * `own` - The listener's contribution, if it sent any.
/// * `out` - Receives one sample per entry of `total`.
pub fn mix_minus(total: &[i32], own: Option<&[i16]>, out: &mut Vec<i16>) {
    out.clear();
    out.extend(total.iter().enumerate().map(|(index, sum)| {
        let own = own.and_then(|own| own.get(index)).copied().unwrap_or(0) as i64;
        clamp(*sum as i64 - own)
    }));
}

/// Apply a telephony-style volume adjustment in place.
///
/// Positive values multiply, negative values divide by their magnitude and
/// zero leaves the samples alone.
///
/// # Arguments
///
/// * `samples` - Signed-linear samples to adjust.
/// * `adjustment` - Volume step, e.g. `2` doubles and `-2` halves.
pub fn adjust_volume(samples: &mut [i16], adjustment: i32) {
    if adjustment == 0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = if adjustment > 0 {
            saturated_multiply(*sample, adjustment)
        } else {
            saturated_divide(*sample, adjustment.saturating_abs())
        };
    }
}

fn clamp(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_subtract_clamp_at_the_extremes() {
        assert_eq!(saturated_add(i16::MAX, 1), i16::MAX);
        assert_eq!(saturated_add(i16::MIN, -1), i16::MIN);
        assert_eq!(saturated_subtract(i16::MIN, 1), i16::MIN);
        assert_eq!(saturated_subtract(i16::MAX, -1), i16::MAX);
        assert_eq!(saturated_add(1000, -250), 750);
    }

    #[test]
    fn add_matches_clamped_wide_sum_over_a_sweep() {
        let values = [i16::MIN, -20000, -1, 0, 1, 12345, 30000, i16::MAX];
        for a in values {
            for b in values {
                let wide = (a as i32 + b as i32).clamp(i16::MIN as i32, i16::MAX as i32);
                assert_eq!(saturated_add(a, b) as i32, wide);
                let wide = (a as i32 - b as i32).clamp(i16::MIN as i32, i16::MAX as i32);
                assert_eq!(saturated_subtract(a, b) as i32, wide);
            }
        }
    }

    #[test]
    fn volume_multiplies_and_divides() {
        let mut samples = vec![100, -100, 20000];
        adjust_volume(&mut samples, 2);
        assert_eq!(samples, vec![200, -200, i16::MAX]);

        let mut samples = vec![100, -100, 7];
        adjust_volume(&mut samples, -2);
        assert_eq!(samples, vec![50, -50, 3]);
    }

    #[test]
    fn zero_divisor_is_ignored() {
        assert_eq!(saturated_divide(123, 0), 123);
    }

    #[test]
    fn mix_minus_clamps_after_removing_the_listener() {
        let mut total = vec![0i32; 3];
        accumulate(&mut total, &[30000, -30000, 100]);
        accumulate(&mut total, &[30000, -30000, 200]);
        accumulate(&mut total, &[10000, 0, 300]);

        let mut out = Vec::new();
        mix_minus(&total, Some(&[30000, -30000, 100]), &mut out);
        assert_eq!(out, vec![i16::MAX, -30000, 500]);

        mix_minus(&total, None, &mut out);
        assert_eq!(out, vec![i16::MAX, i16::MIN, 600]);
    }

    #[test]
    fn add_into_only_touches_overlap() {
        let mut dst = vec![1, 2, 3];
        add_into(&mut dst, &[10]);
        assert_eq!(dst, vec![11, 2, 3]);
        subtract_from(&mut dst, &[1, 2]);
        assert_eq!(dst, vec![10, 0, 3]);
    }
}
