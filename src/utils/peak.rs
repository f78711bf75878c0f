use crate::float::Float;

/// Sub-sample offset of the vertex of the parabola through three equally
/// spaced points, relative to the middle one and clamped to `[-1, 1]`.
///
/// > offset = 0.5 * (left - right) / (left - 2 * mid + right)
///
/// Returns `None` when the points are collinear or the result is not finite.
pub fn parabolic_offset<T: Float>(left: T, mid: T, right: T) -> Option<T> {
    let two = T::cast(2.0);
    let denominator = left - two * mid + right;
    if denominator == T::zero() || !denominator.is_finite() {
        return None;
    }
    let offset = T::cast(0.5) * (left - right) / denominator;
    if !offset.is_finite() {
        return None;
    }
    Some(offset.max(-T::one()).min(T::one()))
}

/// Refine `best` to a fractional position when it lies strictly inside
/// `min..=max`; on the boundary the integer position is returned as-is.
pub fn refine_peak<T: Float>(data: &[T], best: usize, min: usize, max: usize) -> T {
    let position = T::from_index(best);
    if best <= min || best >= max || best + 1 >= data.len() {
        return position;
    }
    match parabolic_offset(data[best - 1], data[best], data[best + 1]) {
        Some(offset) => position + offset,
        None => position,
    }
}

/// Refine the peak nearest to `index`, clamped to `1..=last - 1`. Nothing is
/// interpolated unless the clamped position is a local maximum.
pub fn refine_local_peak<T: Float>(data: &[T], index: usize) -> T {
    if data.len() < 3 {
        return T::from_index(index.min(data.len().saturating_sub(1)));
    }
    let bin = index.max(1).min(data.len() - 2);
    let (left, mid, right) = (data[bin - 1], data[bin], data[bin + 1]);
    if mid < left || mid < right {
        return T::from_index(bin);
    }
    match parabolic_offset(left, mid, right) {
        Some(offset) => T::from_index(bin) + offset,
        None => T::from_index(bin),
    }
}

/// `true` when `data[i]` is positive and not smaller than its neighbours
/// inside `lo..=hi`.
pub fn is_local_max<T: Float>(data: &[T], i: usize, lo: usize, hi: usize) -> bool {
    let value = data[i];
    if !(value > T::zero()) {
        return false;
    }
    let left = data[i.saturating_sub(1).max(lo)];
    let right = data[(i + 1).min(hi)];
    value >= left && value >= right
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_correction() {
        // Samples of -(x - 0.25)^2 + 4 at x = -1, 0, 1.
        let f = |x: f64| -(x - 0.25) * (x - 0.25) + 4.0;
        let offset = parabolic_offset(f(-1.0), f(0.0), f(1.0)).unwrap();
        assert!((offset - 0.25).abs() < 1e-12);
    }

    #[test]
    fn offset_is_clamped() {
        // The vertex of this (convex) parabola lies 1.5 samples to the left.
        let offset = parabolic_offset(0.0f64, 1.0, 3.0).unwrap();
        assert_eq!(offset, -1.0);
    }

    #[test]
    fn collinear_points_have_no_vertex() {
        assert!(parabolic_offset(1.0f64, 2.0, 3.0).is_none());
    }

    #[test]
    fn boundary_peaks_are_not_refined() {
        let data = [0.0f64, 1.0, 3.0, 2.0, 0.0];
        assert_eq!(refine_peak(&data, 2, 2, 4), 2.0);
        let refined = refine_peak(&data, 2, 1, 4);
        assert!(refined > 2.0 && refined < 2.5);
    }

    #[test]
    fn local_peak_is_not_refined_off_a_slope() {
        let data = [0.0f64, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(refine_local_peak(&data, 2), 2.0);
    }
}
