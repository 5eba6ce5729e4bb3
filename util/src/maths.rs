//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float,
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Directed Hausdorff distance from point set `a` to point set `b`.
///
/// This is the largest distance from any element of `a` to its nearest element of `b`. The
/// measure is not symmetric: `hausdorff(a, b, d)` and `hausdorff(b, a, d)` generally differ.
///
/// Returns `None` if either set is empty.
pub fn hausdorff<A, B, T, F>(a: &[A], b: &[B], dist: F) -> Option<T>
where
    T: Float,
    F: Fn(&A, &B) -> T,
{
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut max_min = T::zero();

    for p in a {
        let mut min = T::infinity();
        for q in b {
            let d = dist(p, q);
            if d < min {
                min = d;
            }
        }
        if min > max_min {
            max_min = min;
        }
    }

    Some(max_min)
}

/// Get the signed angular distance between two angles in the range of [0, 2pi].
///
/// This function will return the shortest signed distance between a and b accounting for wrapping
/// between 0 and 2pi.
pub fn get_ang_dist_2pi<T>(a: T, b: T) -> T
where
    T: Float,
{
    let tau_t: T = T::from(std::f64::consts::TAU).unwrap_or_else(T::zero);

    let c = rem_euclid(a - b, tau_t);
    let d = rem_euclid(b - a, tau_t);

    if c < d {
        -c
    } else {
        d
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}
