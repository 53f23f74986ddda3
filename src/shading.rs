use crate::gpu::ShaderFeatures;
use crate::{Float, Rgb, Vec3f};
use cgmath::InnerSpace;

/// Local illumination model applied to each surviving fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shading {
    None,
    Lambert { ka: Float, kd: Float },
    Phong { ka: Float, kd: Float, ks: Float, shininess: Float },
    BlinnPhong { ka: Float, kd: Float, ks: Float, shininess: Float },
}

impl Default for Shading {
    fn default() -> Self {
        Shading::lambert()
    }
}

impl Shading {
    pub fn lambert() -> Self {
        Shading::Lambert { ka: 0.4, kd: 0.6 }
    }

    pub fn phong() -> Self {
        Shading::Phong { ka: 0.3, kd: 0.5, ks: 0.8, shininess: 100.0 }
    }

    pub fn blinn_phong() -> Self {
        Shading::BlinnPhong { ka: 0.3, kd: 0.5, ks: 0.8, shininess: 100.0 }
    }

    pub fn features(&self) -> ShaderFeatures {
        match self {
            Shading::None => ShaderFeatures::empty(),
            Shading::Lambert { .. } => ShaderFeatures::LAMBERT_SHADING,
            Shading::Phong { .. } => ShaderFeatures::PHONG_SHADING,
            Shading::BlinnPhong { .. } => ShaderFeatures::BLINN_PHONG_SHADING,
        }
    }

    /// Shades `color` given unit light and view directions pointing away from
    /// the surface. A zero normal leaves the color untouched.
    pub fn shade(&self, color: Rgb, normal: Vec3f, light_dir: Vec3f, view_dir: Vec3f, two_sided: bool) -> Rgb {
        if matches!(self, Shading::None) || normal.magnitude2() < 1e-12 {
            return color;
        }
        let n = normal.normalize();
        let n = if two_sided && n.dot(view_dir) < 0.0 { -n } else { n };
        let diffuse = n.dot(light_dir).max(0.0);

        let (ka, kd, specular) = match *self {
            Shading::None => return color,
            Shading::Lambert { ka, kd } => (ka, kd, 0.0),
            Shading::Phong { ka, kd, ks, shininess } => {
                let reflected = 2.0 * n.dot(light_dir) * n - light_dir;
                (ka, kd, ks * reflected.dot(view_dir).max(0.0).powf(shininess))
            }
            Shading::BlinnPhong { ka, kd, ks, shininess } => {
                let half = (light_dir + view_dir).normalize();
                (ka, kd, ks * n.dot(half).max(0.0).powf(shininess))
            }
        };
        let k = ka + kd * diffuse;
        [color[0] * k + specular, color[1] * k + specular, color[2] * k + specular]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_zero_normal_is_unshaded() {
        let c = [0.2, 0.4, 0.6];
        let shaded = Shading::phong().shade(c, vec3f!(0, 0, 0), vec3f!(0, 0, 1), vec3f!(0, 0, 1), false);
        assert_eq!(shaded, c);
    }

    #[test]
    fn test_lambert() {
        let c = [1.0, 0.5, 0.0];
        let lit = Shading::lambert().shade(c, vec3f!(0, 0, 1), vec3f!(0, 0, 1), vec3f!(0, 0, 1), false);
        assert_abs_diff_eq!(lit[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lit[1], 0.5, epsilon = 1e-6);

        let back = Shading::lambert().shade(c, vec3f!(0, 0, -1), vec3f!(0, 0, 1), vec3f!(0, 0, 1), false);
        assert_abs_diff_eq!(back[0], 0.4, epsilon = 1e-6);

        let two_sided = Shading::lambert().shade(c, vec3f!(0, 0, -1), vec3f!(0, 0, 1), vec3f!(0, 0, 1), true);
        assert_abs_diff_eq!(two_sided[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_features() {
        assert_eq!(Shading::None.features(), ShaderFeatures::empty());
        assert_eq!(Shading::blinn_phong().features(), ShaderFeatures::BLINN_PHONG_SHADING);
    }
}
