use crate::math::normalize_or_zero;
use crate::{Float, Matrix4f, Point3f, Vec3f};
use cgmath::{Deg, EuclideanSpace, Rad, SquareMatrix, Vector4};

/// View state the renderer polls once per frame.
pub trait Camera {
    fn modelview_matrix(&self) -> Matrix4f;

    fn projection_matrix(&self) -> Matrix4f;

    /// Window size in pixels.
    fn window_size(&self) -> (usize, usize);
}

pub trait Light {
    /// Light position in eye space.
    fn position(&self) -> Point3f;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fovy: Deg<Float>, near: Float, far: Float },
    Orthographic { half_height: Float, near: Float, far: Float },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookAtCamera {
    pub eye: Point3f,
    pub center: Point3f,
    pub up: Vec3f,
    pub projection: Projection,
    /// Object transform applied before the view, e.g. an interactive rotation.
    pub xform: Matrix4f,
    width: usize,
    height: usize,
}

impl LookAtCamera {
    pub fn new(eye: Point3f, center: Point3f, up: Vec3f, projection: Projection, width: usize, height: usize) -> Self {
        Self {
            eye,
            center,
            up,
            projection,
            xform: Matrix4f::identity(),
            width,
            height,
        }
    }

    /// Camera at `+z` looking at the origin.
    pub fn perspective(width: usize, height: usize) -> Self {
        Self::new(
            point3f!(0, 0, 5),
            point3f!(0, 0, 0),
            vec3f!(0, 1, 0),
            Projection::Perspective { fovy: Deg(45.0), near: 0.1, far: 100.0 },
            width,
            height,
        )
    }

    /// Orthographic view of `[-half, half]` vertically, looking down `-z`
    /// from the origin so eye space equals object space.
    pub fn orthographic(half_height: Float, width: usize, height: usize) -> Self {
        Self::new(
            point3f!(0, 0, 0),
            point3f!(0, 0, -1),
            vec3f!(0, 1, 0),
            Projection::Orthographic { half_height, near: -10.0, far: 10.0 },
            width,
            height,
        )
    }

    pub fn set_window_size(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
    }

    pub fn rotate_y(&mut self, angle: Deg<Float>) {
        self.xform = Matrix4f::from_angle_y(Rad::from(angle)) * self.xform;
    }

    fn aspect(&self) -> Float {
        if self.width == 0 || self.height == 0 {
            1.0
        } else {
            self.width as Float / self.height as Float
        }
    }
}

impl Camera for LookAtCamera {
    fn modelview_matrix(&self) -> Matrix4f {
        Matrix4f::look_at_rh(self.eye, self.center, self.up) * self.xform
    }

    fn projection_matrix(&self) -> Matrix4f {
        match self.projection {
            Projection::Perspective { fovy, near, far } => cgmath::perspective(fovy, self.aspect(), near, far),
            Projection::Orthographic { half_height, near, far } => {
                let half_width = half_height * self.aspect();
                cgmath::ortho(-half_width, half_width, -half_height, half_height, near, far)
            }
        }
    }

    fn window_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Point3f,
}

impl PointLight {
    pub fn new(position: Point3f) -> Self {
        Self { position }
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self::new(point3f!(0, 0, 12))
    }
}

impl Light for PointLight {
    fn position(&self) -> Point3f {
        self.position
    }
}

/// A vertex after the fixed-function transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    /// Window coordinates in pixels, origin at the bottom left.
    pub x: Float,
    pub y: Float,
    /// Window depth in [0, 1] for visible points.
    pub depth: Float,
    /// Eye-space position.
    pub eye: Vec3f,
    /// Reciprocal of the clip-space w, for perspective-correct interpolation.
    pub inv_w: Float,
}

/// Object space to window space for one viewport.
#[derive(Debug, Clone)]
pub struct Projector {
    modelview: Matrix4f,
    mvp: Matrix4f,
    inverse_mvp: Option<Matrix4f>,
    inverse_projection: Option<Matrix4f>,
    width: usize,
    height: usize,
}

impl Projector {
    pub fn new(modelview: Matrix4f, projection: Matrix4f, width: usize, height: usize) -> Self {
        let mvp = projection * modelview;
        Self {
            modelview,
            mvp,
            inverse_mvp: mvp.invert(),
            inverse_projection: projection.invert(),
            width,
            height,
        }
    }

    pub fn modelview(&self) -> &Matrix4f {
        &self.modelview
    }

    /// Returns `None` for points at or behind the eye plane.
    pub fn project(&self, p: Point3f) -> Option<ScreenPoint> {
        let h = p.to_homogeneous();
        let clip = self.mvp * h;
        if clip.w <= 1e-6 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(ScreenPoint {
            x: (ndc.x * 0.5 + 0.5) * self.width as Float,
            y: (ndc.y * 0.5 + 0.5) * self.height as Float,
            depth: ndc.z * 0.5 + 0.5,
            eye: (self.modelview * h).truncate(),
            inv_w: 1.0 / clip.w,
        })
    }

    fn window_to_ndc(&self, x: Float, y: Float, depth: Float) -> Vector4<Float> {
        Vector4::new(
            2.0 * x / self.width as Float - 1.0,
            2.0 * y / self.height as Float - 1.0,
            2.0 * depth - 1.0,
            1.0,
        )
    }

    /// Eye-space point under window position `(x, y)` at window depth `depth`.
    pub fn unproject_eye(&self, x: Float, y: Float, depth: Float) -> Option<Vec3f> {
        let p = self.inverse_projection? * self.window_to_ndc(x, y, depth);
        if p.w.abs() < 1e-12 {
            return None;
        }
        Some(p.truncate() / p.w)
    }

    /// Object-space point under window position `(x, y)` at window depth `depth`.
    pub fn unproject(&self, x: Float, y: Float, depth: Float) -> Option<Point3f> {
        let p = self.inverse_mvp? * self.window_to_ndc(x, y, depth);
        if p.w.abs() < 1e-12 {
            return None;
        }
        Some(Point3f::from_vec(p.truncate() / p.w))
    }

    /// Unit direction from an eye-space position towards an eye-space light.
    pub fn light_direction(eye_pos: Vec3f, light: Point3f) -> Vec3f {
        normalize_or_zero(light.to_vec() - eye_pos)
    }
}
