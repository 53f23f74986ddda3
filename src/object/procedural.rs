//! Synthetic datasets for the demo binary, benches and tests.

use super::{CellType, LineObject, LineType, PointObject, PolygonObject, PolygonType, StructuredVolume, UnstructuredVolume};
use crate::error::ObjectError;
use crate::{Float, Point3f, Vec3f};
use cgmath::{EuclideanSpace, InnerSpace};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// The cube `[-1, 1]^3` split into `n^3` cells of six tetrahedra each, with a
/// radial scalar field that is 1 at the center and 0 at the corners.
pub fn tetrahedral_cube(n: usize) -> Result<UnstructuredVolume, ObjectError> {
    let n = n.max(1);
    let stride = n + 1;
    let node = |i: usize, j: usize, k: usize| (i + j * stride + k * stride * stride) as u32;

    let mut coords = Vec::with_capacity(stride * stride * stride);
    for k in 0..stride {
        for j in 0..stride {
            for i in 0..stride {
                let c = |t: usize| -1.0 + 2.0 * t as Float / n as Float;
                coords.push(Point3f::new(c(i), c(j), c(k)));
            }
        }
    }

    let values: Vec<f32> = coords.iter()
        .map(|p| 1.0 - p.to_vec().magnitude() / (3.0 as Float).sqrt())
        .collect();

    // Kuhn subdivision: one tetrahedron per monotone path from corner 000 to 111
    const PATHS: [[usize; 3]; 6] = [
        [0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0],
    ];
    let mut connections = Vec::with_capacity(n * n * n * 6 * 4);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                for path in PATHS.iter() {
                    let mut corner = [i, j, k];
                    connections.push(node(corner[0], corner[1], corner[2]));
                    for &axis in path.iter() {
                        corner[axis] += 1;
                        connections.push(node(corner[0], corner[1], corner[2]));
                    }
                }
            }
        }
    }

    Ok(UnstructuredVolume::new(CellType::Tetrahedra, coords, connections, values)?
        .with_name("tetrahedral_cube"))
}

/// `n^3` grid over `[-1, 1]^3` holding a gaussian blob as bytes.
pub fn radial_grid(n: usize) -> Result<StructuredVolume, ObjectError> {
    let n = n.max(2);
    let mut values = Vec::with_capacity(n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let c = |t: usize| -1.0 + 2.0 * t as Float / (n - 1) as Float;
                let r2 = c(i) * c(i) + c(j) * c(j) + c(k) * c(k);
                values.push((255.0 * (-2.0 * r2).exp()) as u8);
            }
        }
    }
    Ok(StructuredVolume::new([n, n, n], values)?
        .with_bounds(point3f!(-1, -1, -1), point3f!(1, 1, 1))
        .with_value_range(0.0, 255.0)
        .with_name("radial_grid"))
}

/// The twelve edges of an axis-aligned box.
pub fn bounding_box_lines(min: Point3f, max: Point3f, color: [u8; 3]) -> Result<LineObject, ObjectError> {
    let coords: Vec<Point3f> = (0..8)
        .map(|c| Point3f::new(
            if c & 1 == 0 { min.x } else { max.x },
            if c & 2 == 0 { min.y } else { max.y },
            if c & 4 == 0 { min.z } else { max.z },
        ))
        .collect();
    let connections = vec![
        0, 1, 2, 3, 4, 5, 6, 7,
        0, 2, 1, 3, 4, 6, 5, 7,
        0, 4, 1, 5, 2, 6, 3, 7,
    ];
    Ok(LineObject::new(LineType::Segment, coords, connections, vec![color])?
        .with_name("bounding_box"))
}

/// The six faces of an axis-aligned box as a triangle mesh with flat normals.
pub fn box_surface(min: Point3f, max: Point3f, color: [u8; 3], opacity: u8) -> Result<PolygonObject, ObjectError> {
    let corner = |c: usize| Point3f::new(
        if c & 1 == 0 { min.x } else { max.x },
        if c & 2 == 0 { min.y } else { max.y },
        if c & 4 == 0 { min.z } else { max.z },
    );
    // corners of each face, counter-clockwise seen from outside
    let faces: [([usize; 4], Vec3f); 6] = [
        ([0, 4, 6, 2], -Vec3f::unit_x()),
        ([1, 3, 7, 5], Vec3f::unit_x()),
        ([0, 1, 5, 4], -Vec3f::unit_y()),
        ([2, 6, 7, 3], Vec3f::unit_y()),
        ([0, 2, 3, 1], -Vec3f::unit_z()),
        ([4, 5, 7, 6], Vec3f::unit_z()),
    ];
    let mut coords = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut connections = Vec::with_capacity(36);
    for (corners, normal) in faces.iter() {
        let base = coords.len() as u32;
        coords.extend(corners.iter().map(|&c| corner(c)));
        normals.extend(std::iter::repeat(*normal).take(4));
        connections.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    Ok(PolygonObject::new(PolygonType::Triangle, coords, connections, vec![color])?
        .with_opacities(vec![opacity])?
        .with_normals(normals)?
        .with_name("box_surface"))
}

/// Particles scattered on a sphere shell, colored by height, with outward normals.
pub fn sphere_particles(count: usize, radius: Float, seed: u64) -> Result<PointObject, ObjectError> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut coords = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count);
    let mut colors = Vec::with_capacity(count);
    for _ in 0..count {
        let z: Float = rng.gen_range(-1.0..1.0);
        let phi: Float = rng.gen_range(0.0..std::f32::consts::PI * 2.0);
        let r = (1.0 - z * z).max(0.0).sqrt();
        let n = Vec3f::new(r * phi.cos(), r * phi.sin(), z);
        coords.push(Point3f::from_vec(n * radius));
        normals.push(n);
        let t = (z * 0.5 + 0.5) * 255.0;
        colors.push([t as u8, 96, (255.0 - t) as u8]);
    }
    Ok(PointObject::new(coords, colors, normals)?.with_name("sphere_particles"))
}
