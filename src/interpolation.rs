//! Interpolation primitives for regular height grids
//!
//! Bilinear lookup is used for every height query. Lagrange polynomials and
//! cardinal splines are only used while up-sampling a probed matrix.

/// Linear interpolation between `a` and `b`
#[inline]
pub fn lerp(t: f64, a: f64, b: f64) -> f64 {
    (1.0 - t) * a + t * b
}

/// Locate `coord` on an axis of `count` evenly spaced nodes.
///
/// Returns the fractional offset into the cell and the index of the cell's
/// lower node. Coordinates outside the axis are clamped to the edge cell.
#[inline]
pub fn linear_index(coord: f64, min: f64, dist: f64, count: usize) -> (f64, usize) {
    let t = (coord - min) / dist;
    let idx = (t.floor() as i64).clamp(0, count as i64 - 2) as usize;
    let t = (t - idx as f64).clamp(0.0, 1.0);
    (t, idx)
}

/// Bilinear lookup in a row-major matrix given per-axis cell positions
#[inline]
pub fn bilinear(matrix: &[Vec<f64>], (tx, xi): (f64, usize), (ty, yi): (f64, usize)) -> f64 {
    let z0 = lerp(tx, matrix[yi][xi], matrix[yi][xi + 1]);
    let z1 = lerp(tx, matrix[yi + 1][xi], matrix[yi + 1][xi + 1]);
    lerp(ty, z0, z1)
}

/// Evaluate the Lagrange polynomial through `(points[i], values[i])` at `c`
pub fn lagrange(points: &[f64], values: &[f64], c: f64) -> f64 {
    let mut total = 0.0;
    for (i, (&pi, &zi)) in points.iter().zip(values).enumerate() {
        let mut n = 1.0;
        let mut d = 1.0;
        for (j, &pj) in points.iter().enumerate() {
            if j == i {
                continue;
            }
            n *= c - pj;
            d *= pi - pj;
        }
        total += zi * n / d;
    }
    total
}

/// Cardinal spline segment between `p[1]` and `p[2]`
#[inline]
pub fn cardinal_spline(p: [f64; 4], t: f64, tension: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    let m1 = tension * (p[2] - p[0]);
    let m2 = tension * (p[3] - p[1]);
    let a = p[1] * (2.0 * t3 - 3.0 * t2 + 1.0);
    let b = p[2] * (-2.0 * t3 + 3.0 * t2);
    let c = m1 * (t3 - 2.0 * t2 + t);
    let d = m2 * (t3 - t2);
    a + b + c + d
}

/// Spline control points for position `i` of an up-sampled line whose
/// probed values sit every `mult` entries. The end segments repeat their
/// outer point.
pub fn spline_control_points(line: &[f64], i: usize, mult: usize) -> ([f64; 4], f64) {
    let last = line.len() - 1 - mult;
    let m = mult as f64;
    if i < mult {
        (
            [line[0], line[0], line[mult], line[2 * mult]],
            i as f64 / m,
        )
    } else if i > last {
        (
            [line[last - mult], line[last], line[last + mult], line[last + mult]],
            (i - last) as f64 / m,
        )
    } else {
        let start = i - i % mult;
        (
            [
                line[start - mult],
                line[start],
                line[start + mult],
                line[start + 2 * mult],
            ],
            (i - start) as f64 / m,
        )
    }
}
