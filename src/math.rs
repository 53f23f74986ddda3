use crate::{Float, Matrix4f, Vec3f, Vec4f};
use cgmath::{InnerSpace, Matrix, SquareMatrix};

pub const INFINITY: Float = std::f32::INFINITY;

pub fn lerp(t: Float, v1: Float, v2: Float) -> Float {
    (1.0 - t) * v1 + t * v2
}

/// Normalizes `v`, returning the zero vector when `v` has no usable length.
pub fn normalize_or_zero(v: Vec3f) -> Vec3f {
    let len = v.magnitude();
    if len > 0.0 && len.is_finite() {
        v / len
    } else {
        Vec3f::new(0.0, 0.0, 0.0)
    }
}

/// Packs a unit-range vector into signed bytes scaled by 127.
pub fn quantize_snorm8(v: Vec3f) -> [i8; 3] {
    let q = |c: Float| (c.max(-1.0).min(1.0) * 127.0).round() as i8;
    [q(v.x), q(v.y), q(v.z)]
}

pub fn dequantize_snorm8(n: [i8; 3]) -> Vec3f {
    Vec3f::new(n[0] as Float, n[1] as Float, n[2] as Float) / 127.0
}

/// Solves `A x = b` where the rows of `A` are given. Returns `None` for singular systems.
#[allow(non_snake_case)]
pub fn solve_linear_system_4x4(rows: [Vec4f; 4], b: Vec4f) -> Option<Vec4f> {
    // cgmath is col-major, so build from rows and transpose
    let A = Matrix4f::from_cols(rows[0], rows[1], rows[2], rows[3]).transpose();
    let inv = A.invert()?;
    let x = inv * b;
    if x.x.is_finite() && x.y.is_finite() && x.z.is_finite() && x.w.is_finite() {
        Some(x)
    } else {
        None
    }
}

/// Flattens a matrix column by column, the order a GL uniform upload uses.
pub fn matrix_to_array(m: &Matrix4f) -> [Float; 16] {
    let cols: &[[Float; 4]; 4] = m.as_ref();
    let mut out = [0.0; 16];
    for (c, col) in cols.iter().enumerate() {
        out[c * 4..c * 4 + 4].copy_from_slice(col);
    }
    out
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cgmath::Vector4;

    #[test]
    fn test_solve_linear_system() {
        // s = 2x - y + 3z + 1
        let rows = [
            Vector4::new(0.0, 0.0, 0.0, 1.0),
            Vector4::new(1.0, 0.0, 0.0, 1.0),
            Vector4::new(0.0, 1.0, 0.0, 1.0),
            Vector4::new(0.0, 0.0, 1.0, 1.0),
        ];
        let b = Vector4::new(1.0, 3.0, 0.0, 4.0);
        let x = solve_linear_system_4x4(rows, b).unwrap();
        assert_abs_diff_eq!(x, Vector4::new(2.0, -1.0, 3.0, 1.0), epsilon = 1e-5);

        let flat = [Vector4::new(1.0, 0.0, 0.0, 1.0); 4];
        assert_eq!(solve_linear_system_4x4(flat, b), None);
    }

    #[test]
    fn test_normalize_zero() {
        assert_eq!(normalize_or_zero(vec3f!(0, 0, 0)), vec3f!(0, 0, 0));
        assert_abs_diff_eq!(normalize_or_zero(vec3f!(0, 3, 4)), vec3f!(0, 0.6, 0.8));
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize_snorm8(vec3f!(1, -1, 0)), [127, -127, 0]);
        assert_abs_diff_eq!(dequantize_snorm8([127, 0, -127]), vec3f!(1, 0, -1));
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12347, 1024 * 1024), 1);
        assert_eq!(gcd(12, 18), 6);
    }
}
