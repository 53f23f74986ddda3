//! Host-side geometry snapshots consumed by the rendering engines.
//!
//! Objects are immutable once built and are shared with engines through
//! `Arc<RenderObject>`. Construction validates connectivity, so every engine
//! can index vertex arrays without further checks.

pub mod value_array;
pub mod procedural;

pub use value_array::{ValueArray, ValueRange};

use crate::error::ObjectError;
use crate::{Float, Point3f, Vec3f};
use once_cell::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    Tetrahedra,
    QuadraticTetrahedra,
    Hexahedra,
    QuadraticHexahedra,
    Pyramid,
    Prism,
}

impl CellType {
    pub fn nnodes(self) -> usize {
        match self {
            CellType::Tetrahedra => 4,
            CellType::QuadraticTetrahedra => 10,
            CellType::Hexahedra => 8,
            CellType::QuadraticHexahedra => 20,
            CellType::Pyramid => 5,
            CellType::Prism => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CellType::Tetrahedra => "tetrahedra",
            CellType::QuadraticTetrahedra => "quadratic tetrahedra",
            CellType::Hexahedra => "hexahedra",
            CellType::QuadraticHexahedra => "quadratic hexahedra",
            CellType::Pyramid => "pyramid",
            CellType::Prism => "prism",
        }
    }
}

fn check_connections(connections: &[u32], nnodes: usize) -> Result<(), ObjectError> {
    match connections.iter().enumerate().find(|(_, &n)| n as usize >= nnodes) {
        Some((index, &node)) => Err(ObjectError::ConnectionOutOfRange { index, node, nnodes }),
        None => Ok(()),
    }
}

fn check_len(what: &'static str, actual: usize, allowed: &[usize]) -> Result<(), ObjectError> {
    if allowed.contains(&actual) {
        Ok(())
    } else {
        Err(ObjectError::LengthMismatch { what, expected: *allowed.last().unwrap_or(&0), actual })
    }
}

/// Unstructured volume: node coordinates, cell connectivity and one scalar per
/// node for each time step.
#[derive(Debug, Clone)]
pub struct UnstructuredVolume {
    name: String,
    cell_type: CellType,
    coords: Vec<Point3f>,
    connections: Vec<u32>,
    values: ValueArray,
    time_steps: usize,
    value_range: OnceCell<ValueRange>,
}

impl UnstructuredVolume {
    pub fn new(
        cell_type: CellType,
        coords: Vec<Point3f>,
        connections: Vec<u32>,
        values: impl Into<ValueArray>,
    ) -> Result<Self, ObjectError> {
        let values = values.into();
        let nnodes = coords.len();
        let per_cell = cell_type.nnodes();
        if connections.len() % per_cell != 0 {
            return Err(ObjectError::RaggedConnections { count: connections.len(), per_cell });
        }
        check_connections(&connections, nnodes)?;
        if nnodes == 0 || values.len() % nnodes != 0 || values.is_empty() {
            return Err(ObjectError::BadStepCount { values: values.len(), nnodes });
        }
        let time_steps = values.len() / nnodes;

        Ok(Self {
            name: String::new(),
            cell_type,
            coords,
            connections,
            values,
            time_steps,
            value_range: OnceCell::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the range used to normalize values instead of the data's own min/max.
    pub fn with_value_range(self, min: f64, max: f64) -> Self {
        let value_range = OnceCell::new();
        let _ = value_range.set(ValueRange::new(min, max));
        Self { value_range, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn coords(&self) -> &[Point3f] {
        &self.coords
    }

    pub fn connections(&self) -> &[u32] {
        &self.connections
    }

    pub fn values(&self) -> &ValueArray {
        &self.values
    }

    pub fn time_steps(&self) -> usize {
        self.time_steps
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn cell_count(&self) -> usize {
        self.connections.len() / self.cell_type.nnodes()
    }

    pub fn cell(&self, index: usize) -> &[u32] {
        let n = self.cell_type.nnodes();
        &self.connections[index * n..(index + 1) * n]
    }

    /// Scalar of `node` at time `step`.
    pub fn value(&self, step: usize, node: usize) -> f64 {
        self.values.value(step * self.coords.len() + node)
    }

    /// Min/max over all steps, computed on first use.
    pub fn value_range(&self) -> ValueRange {
        *self.value_range.get_or_init(|| {
            let (min, max) = self.values.min_max().unwrap_or((0.0, 0.0));
            ValueRange::new(min, max)
        })
    }
}

/// Uniform grid of scalars spanning an axis-aligned box in object space.
#[derive(Debug, Clone)]
pub struct StructuredVolume {
    name: String,
    resolution: [usize; 3],
    min_coord: Point3f,
    max_coord: Point3f,
    values: ValueArray,
    value_range: OnceCell<ValueRange>,
}

impl StructuredVolume {
    pub fn new(resolution: [usize; 3], values: impl Into<ValueArray>) -> Result<Self, ObjectError> {
        let values = values.into();
        if resolution.iter().any(|&r| r == 0) {
            return Err(ObjectError::EmptyGrid(resolution));
        }
        let expected = resolution[0] * resolution[1] * resolution[2];
        check_len("grid values", values.len(), &[expected])?;
        let max = |r: usize| (r - 1) as Float;
        Ok(Self {
            name: String::new(),
            resolution,
            min_coord: Point3f::new(0.0, 0.0, 0.0),
            max_coord: Point3f::new(max(resolution[0]), max(resolution[1]), max(resolution[2])),
            values,
            value_range: OnceCell::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_bounds(mut self, min_coord: Point3f, max_coord: Point3f) -> Self {
        self.min_coord = min_coord;
        self.max_coord = max_coord;
        self
    }

    pub fn with_value_range(self, min: f64, max: f64) -> Self {
        let value_range = OnceCell::new();
        let _ = value_range.set(ValueRange::new(min, max));
        Self { value_range, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolution(&self) -> [usize; 3] {
        self.resolution
    }

    pub fn min_coord(&self) -> Point3f {
        self.min_coord
    }

    pub fn max_coord(&self) -> Point3f {
        self.max_coord
    }

    pub fn values(&self) -> &ValueArray {
        &self.values
    }

    pub fn node_count(&self) -> usize {
        self.resolution.iter().product()
    }

    pub fn value_range(&self) -> ValueRange {
        *self.value_range.get_or_init(|| {
            let (min, max) = self.values.min_max().unwrap_or((0.0, 0.0));
            ValueRange::new(min, max)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    /// One strip through every vertex in order; connections are ignored.
    Strip,
    /// One strip through the vertices listed in the connections.
    Uniline,
    /// Connections hold `[first, last]` pairs, each a strip over a vertex range.
    Polyline,
    /// Connections hold independent `[a, b]` segments.
    Segment,
}

#[derive(Debug, Clone)]
pub struct LineObject {
    name: String,
    coords: Vec<Point3f>,
    colors: Vec<[u8; 3]>,
    connections: Vec<u32>,
    line_type: LineType,
    size: Float,
    opacity: Float,
}

impl LineObject {
    pub fn new(
        line_type: LineType,
        coords: Vec<Point3f>,
        connections: Vec<u32>,
        colors: Vec<[u8; 3]>,
    ) -> Result<Self, ObjectError> {
        check_connections(&connections, coords.len())?;
        if matches!(line_type, LineType::Polyline | LineType::Segment) && connections.len() % 2 != 0 {
            return Err(ObjectError::RaggedConnections { count: connections.len(), per_cell: 2 });
        }
        check_len("line colors", colors.len(), &[0, 1, coords.len()])?;
        Ok(Self {
            name: String::new(),
            coords,
            colors,
            connections,
            line_type,
            size: 1.0,
            opacity: 1.0,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_size(mut self, size: Float) -> Self {
        self.size = size.max(1.0);
        self
    }

    pub fn with_opacity(mut self, opacity: Float) -> Self {
        self.opacity = opacity.max(0.0).min(1.0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coords(&self) -> &[Point3f] {
        &self.coords
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn connections(&self) -> &[u32] {
        &self.connections
    }

    pub fn line_type(&self) -> LineType {
        self.line_type
    }

    pub fn size(&self) -> Float {
        self.size
    }

    pub fn opacity(&self) -> Float {
        self.opacity
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    /// Color of vertex `i`, white when the object has no colors.
    pub fn color(&self, i: usize) -> [u8; 3] {
        match self.colors.len() {
            0 => [255, 255, 255],
            1 => self.colors[0],
            _ => self.colors[i],
        }
    }

    /// Expands the connectivity into independent vertex pairs.
    pub fn segments(&self) -> Vec<[u32; 2]> {
        let strip = |ids: &mut dyn Iterator<Item = u32>| -> Vec<[u32; 2]> {
            let ids: Vec<u32> = ids.collect();
            ids.windows(2).map(|w| [w[0], w[1]]).collect()
        };
        match self.line_type {
            LineType::Strip => strip(&mut (0..self.coords.len() as u32)),
            LineType::Uniline => strip(&mut self.connections.iter().copied()),
            LineType::Polyline => self.connections.chunks_exact(2)
                .flat_map(|c| strip(&mut (c[0].min(c[1])..=c[0].max(c[1]))))
                .collect(),
            LineType::Segment => self.connections.chunks_exact(2)
                .map(|c| [c[0], c[1]])
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointObject {
    name: String,
    coords: Vec<Point3f>,
    colors: Vec<[u8; 3]>,
    normals: Vec<Vec3f>,
    size: Float,
}

impl PointObject {
    pub fn new(coords: Vec<Point3f>, colors: Vec<[u8; 3]>, normals: Vec<Vec3f>) -> Result<Self, ObjectError> {
        check_len("point colors", colors.len(), &[0, 1, coords.len()])?;
        check_len("point normals", normals.len(), &[0, coords.len()])?;
        Ok(Self {
            name: String::new(),
            coords,
            colors,
            normals,
            size: 1.0,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_size(mut self, size: Float) -> Self {
        self.size = size.max(1.0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coords(&self) -> &[Point3f] {
        &self.coords
    }

    pub fn normals(&self) -> &[Vec3f] {
        &self.normals
    }

    pub fn size(&self) -> Float {
        self.size
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn color(&self, i: usize) -> [u8; 3] {
        match self.colors.len() {
            0 => [255, 255, 255],
            1 => self.colors[0],
            _ => self.colors[i],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonType {
    Triangle,
    Quadrangle,
}

impl PolygonType {
    pub fn nnodes(self) -> usize {
        match self {
            PolygonType::Triangle => 3,
            PolygonType::Quadrangle => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PolygonType::Triangle => "triangle",
            PolygonType::Quadrangle => "quadrangle",
        }
    }
}

/// Surface mesh with per-vertex or single colors and opacities and optional
/// per-vertex normals.
#[derive(Debug, Clone)]
pub struct PolygonObject {
    name: String,
    polygon_type: PolygonType,
    coords: Vec<Point3f>,
    connections: Vec<u32>,
    colors: Vec<[u8; 3]>,
    opacities: Vec<u8>,
    normals: Vec<Vec3f>,
}

impl PolygonObject {
    /// Empty `connections` takes the vertices in order, `nnodes` at a time.
    pub fn new(
        polygon_type: PolygonType,
        coords: Vec<Point3f>,
        connections: Vec<u32>,
        colors: Vec<[u8; 3]>,
    ) -> Result<Self, ObjectError> {
        let per_cell = polygon_type.nnodes();
        let count = if connections.is_empty() { coords.len() } else { connections.len() };
        if count % per_cell != 0 {
            return Err(ObjectError::RaggedConnections { count, per_cell });
        }
        check_connections(&connections, coords.len())?;
        check_len("polygon colors", colors.len(), &[0, 1, coords.len()])?;
        Ok(Self {
            name: String::new(),
            polygon_type,
            coords,
            connections,
            colors,
            opacities: vec![255],
            normals: Vec::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// One opacity for the whole mesh or one per vertex.
    pub fn with_opacities(mut self, opacities: Vec<u8>) -> Result<Self, ObjectError> {
        check_len("polygon opacities", opacities.len(), &[1, self.coords.len()])?;
        self.opacities = opacities;
        Ok(self)
    }

    pub fn with_normals(mut self, normals: Vec<Vec3f>) -> Result<Self, ObjectError> {
        check_len("polygon normals", normals.len(), &[0, self.coords.len()])?;
        self.normals = normals;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polygon_type(&self) -> PolygonType {
        self.polygon_type
    }

    pub fn coords(&self) -> &[Point3f] {
        &self.coords
    }

    pub fn connections(&self) -> &[u32] {
        &self.connections
    }

    pub fn normals(&self) -> &[Vec3f] {
        &self.normals
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn polygon_count(&self) -> usize {
        let count = if self.connections.is_empty() { self.coords.len() } else { self.connections.len() };
        count / self.polygon_type.nnodes()
    }

    /// Vertex indices of every polygon, explicit even when the connectivity is implicit.
    pub fn indices(&self) -> Vec<u32> {
        if self.connections.is_empty() {
            (0..self.coords.len() as u32).collect()
        } else {
            self.connections.clone()
        }
    }

    pub fn color(&self, i: usize) -> [u8; 3] {
        match self.colors.len() {
            0 => [255, 255, 255],
            1 => self.colors[0],
            _ => self.colors[i],
        }
    }

    pub fn opacity(&self, i: usize) -> u8 {
        match self.opacities.len() {
            1 => self.opacities[0],
            _ => self.opacities[i],
        }
    }
}

/// Every kind of geometry an engine can be bound to.
#[derive(Debug, Clone)]
pub enum RenderObject {
    Point(PointObject),
    Line(LineObject),
    Polygon(PolygonObject),
    Unstructured(UnstructuredVolume),
    Structured(StructuredVolume),
}

impl RenderObject {
    pub fn name(&self) -> &str {
        match self {
            RenderObject::Point(o) => o.name(),
            RenderObject::Line(o) => o.name(),
            RenderObject::Polygon(o) => o.name(),
            RenderObject::Unstructured(o) => o.name(),
            RenderObject::Structured(o) => o.name(),
        }
    }

    /// Human readable kind, used in diagnostics.
    pub fn kind(&self) -> String {
        match self {
            RenderObject::Point(_) => "point".to_string(),
            RenderObject::Line(_) => "line".to_string(),
            RenderObject::Polygon(o) => format!("polygon ({})", o.polygon_type().name()),
            RenderObject::Unstructured(o) => format!("unstructured volume ({})", o.cell_type().name()),
            RenderObject::Structured(_) => "structured volume".to_string(),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            RenderObject::Point(o) => o.node_count(),
            RenderObject::Line(o) => o.node_count(),
            RenderObject::Polygon(o) => o.node_count(),
            RenderObject::Unstructured(o) => o.node_count(),
            RenderObject::Structured(o) => o.node_count(),
        }
    }
}

impl From<PointObject> for RenderObject {
    fn from(o: PointObject) -> Self {
        RenderObject::Point(o)
    }
}

impl From<LineObject> for RenderObject {
    fn from(o: LineObject) -> Self {
        RenderObject::Line(o)
    }
}

impl From<PolygonObject> for RenderObject {
    fn from(o: PolygonObject) -> Self {
        RenderObject::Polygon(o)
    }
}

impl From<UnstructuredVolume> for RenderObject {
    fn from(o: UnstructuredVolume) -> Self {
        RenderObject::Unstructured(o)
    }
}

impl From<StructuredVolume> for RenderObject {
    fn from(o: StructuredVolume) -> Self {
        RenderObject::Structured(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn single_tet() -> Vec<Point3f> {
        vec![point3f!(0, 0, 0), point3f!(1, 0, 0), point3f!(0, 1, 0), point3f!(0, 0, 1)]
    }

    #[test]
    fn test_unstructured_validation() {
        let err = UnstructuredVolume::new(CellType::Tetrahedra, single_tet(), vec![0, 1, 2, 4], vec![0f32; 4])
            .unwrap_err();
        assert_eq!(err, ObjectError::ConnectionOutOfRange { index: 3, node: 4, nnodes: 4 });

        let err = UnstructuredVolume::new(CellType::Tetrahedra, single_tet(), vec![0, 1, 2], vec![0f32; 4])
            .unwrap_err();
        assert_eq!(err, ObjectError::RaggedConnections { count: 3, per_cell: 4 });

        let err = UnstructuredVolume::new(CellType::Tetrahedra, single_tet(), vec![0, 1, 2, 3], vec![0f32; 6])
            .unwrap_err();
        assert_eq!(err, ObjectError::BadStepCount { values: 6, nnodes: 4 });
    }

    #[test]
    fn test_time_steps_and_range() {
        let values: Vec<u16> = vec![0, 1, 2, 3, 10, 11, 12, 13];
        let volume = UnstructuredVolume::new(CellType::Tetrahedra, single_tet(), vec![0, 1, 2, 3], values)
            .unwrap();
        assert_eq!(volume.time_steps(), 2);
        assert_eq!(volume.value(1, 2), 12.0);
        assert_eq!(volume.value_range(), ValueRange::new(0.0, 13.0));

        let volume = volume.with_value_range(-1.0, 1.0);
        assert_eq!(volume.value_range(), ValueRange::new(-1.0, 1.0));
    }

    #[test]
    fn test_line_segments() {
        let coords = vec![point3f!(0, 0, 0); 5];
        let strip = LineObject::new(LineType::Strip, coords.clone(), vec![], vec![]).unwrap();
        assert_eq!(strip.segments(), vec![[0, 1], [1, 2], [2, 3], [3, 4]]);

        let uniline = LineObject::new(LineType::Uniline, coords.clone(), vec![4, 2, 0], vec![]).unwrap();
        assert_eq!(uniline.segments(), vec![[4, 2], [2, 0]]);

        let poly = LineObject::new(LineType::Polyline, coords.clone(), vec![0, 2, 3, 4], vec![]).unwrap();
        assert_eq!(poly.segments(), vec![[0, 1], [1, 2], [3, 4]]);

        let seg = LineObject::new(LineType::Segment, coords.clone(), vec![0, 4, 1, 3], vec![[1, 2, 3]]).unwrap();
        assert_eq!(seg.segments(), vec![[0, 4], [1, 3]]);
        assert_eq!(seg.color(3), [1, 2, 3]);

        assert!(LineObject::new(LineType::Segment, coords, vec![0, 1, 2], vec![]).is_err());
    }

    #[test]
    fn test_polygon_validation() {
        let coords = vec![point3f!(0, 0, 0), point3f!(1, 0, 0), point3f!(0, 1, 0), point3f!(1, 1, 0)];
        let implicit = PolygonObject::new(PolygonType::Quadrangle, coords.clone(), vec![], vec![]).unwrap();
        assert_eq!(implicit.polygon_count(), 1);
        assert_eq!(implicit.indices(), vec![0, 1, 2, 3]);

        let err = PolygonObject::new(PolygonType::Triangle, coords.clone(), vec![], vec![]).unwrap_err();
        assert_eq!(err, ObjectError::RaggedConnections { count: 4, per_cell: 3 });

        let tris = PolygonObject::new(PolygonType::Triangle, coords.clone(), vec![0, 1, 2, 2, 1, 3], vec![[9, 8, 7]])
            .unwrap()
            .with_opacities(vec![10, 20, 30, 40])
            .unwrap();
        assert_eq!(tris.polygon_count(), 2);
        assert_eq!((tris.color(3), tris.opacity(3)), ([9, 8, 7], 40));
        assert_eq!(PolygonObject::new(PolygonType::Triangle, coords.clone(), vec![0, 1, 2], vec![]).unwrap().opacity(2), 255);

        let err = tris.clone().with_opacities(vec![1, 2]).unwrap_err();
        assert_eq!(err, ObjectError::LengthMismatch { what: "polygon opacities", expected: 4, actual: 2 });
        assert!(tris.with_normals(vec![vec3f!(0, 0, 1); 2]).is_err());
        assert!(PolygonObject::new(PolygonType::Triangle, coords, vec![0, 1, 4], vec![]).is_err());
    }

    #[test]
    fn test_grid_bounds_default() {
        let grid = StructuredVolume::new([2, 3, 4], vec![0u8; 24]).unwrap();
        assert_eq!(grid.max_coord(), point3f!(1, 2, 3));
        assert_eq!(StructuredVolume::new([2, 0, 4], vec![0u8; 0]).unwrap_err(), ObjectError::EmptyGrid([2, 0, 4]));
    }
}
