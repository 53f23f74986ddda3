use approx::assert_relative_eq;
use std::sync::Arc;
use stochastic_renderer::camera::{LookAtCamera, PointLight};
use stochastic_renderer::engine::{TetrahedraEngine, UniformGridEngine};
use stochastic_renderer::gpu::Device;
use stochastic_renderer::object::{CellType, StructuredVolume, UnstructuredVolume};
use stochastic_renderer::preintegration::PreIntegrationTable;
use stochastic_renderer::shading::Shading;
use stochastic_renderer::transfer_function::TransferFunction;
use stochastic_renderer::{Float, Point3f, RendererConfig, StochasticRenderer};

const SIZE: usize = 64;

/// Tetrahedron whose projection along -z is the lower-left half of the view.
/// Its front face lies at z = 1 and the ray thickness at NDC `(x, y)` is
/// `2·λ` with `λ = -(x + y) / 2`.
fn corner_tetrahedron() -> anyhow::Result<UnstructuredVolume> {
    Ok(UnstructuredVolume::new(
        CellType::Tetrahedra,
        vec![
            Point3f::new(-1.0, -1.0, 1.0),
            Point3f::new(1.0, -1.0, 1.0),
            Point3f::new(-1.0, 1.0, 1.0),
            Point3f::new(-1.0, -1.0, -1.0),
        ],
        vec![0, 1, 2, 3],
        vec![0.5f32; 4],
    )?
    .with_value_range(0.0, 1.0))
}

fn ndc(pixel: usize) -> Float {
    (pixel as Float + 0.5) / (SIZE as Float / 2.0) - 1.0
}

fn render_average(renderer: &mut StochasticRenderer) -> anyhow::Result<Vec<[Float; 4]>> {
    let mut device = Device::new();
    let camera = LookAtCamera::orthographic(1.0, SIZE, SIZE);
    renderer.render_frame(&mut device, &camera, &PointLight::default())?;
    renderer
        .ensemble()
        .average(&device)
        .ok_or_else(|| anyhow::anyhow!("ensemble buffer not allocated"))
}

fn tetrahedron_renderer(edge_size: Float, passes: usize) -> anyhow::Result<StochasticRenderer> {
    let mut engine = TetrahedraEngine::with_object(Arc::new(corner_tetrahedron()?.into()))?;
    engine.set_transfer_function(&TransferFunction::gray_ramp(257));
    engine.set_edge_size(edge_size);
    engine.set_shading(Shading::None);

    let mut renderer = StochasticRenderer::new(RendererConfig::default().with_repetition_level(passes))?;
    renderer.add_engine(Box::new(engine));
    Ok(renderer)
}

#[test]
fn diagonal_of_identity_ramp() {
    let mut table = PreIntegrationTable::new();
    table.set_transfer_function(&TransferFunction::gray_ramp(257), 0.0, 1.0);
    table.create(1.0);
    let texel = table.get(128, 128).unwrap();
    // opacity(0.5) * gray(0.5)
    assert_relative_eq!(texel[0], 0.25, epsilon = 1e-6);
    assert_relative_eq!(texel[3], 0.5, epsilon = 1e-6);
}

#[test]
fn single_tetrahedron_center_matches_single_sample() -> anyhow::Result<()> {
    let mut renderer = tetrahedron_renderer(0.1, 50)?;
    let average = render_average(&mut renderer)?;
    assert_eq!(renderer.ensemble().count(), 50);

    // λ = 0.5, thickness 1, density 0.5 / 0.1
    let (x, y) = (15, 16);
    assert_relative_eq!(ndc(x) + ndc(y), -1.0, epsilon = 1e-6);
    let expected = 0.5 * (1.0 - (-5.0 as Float).exp());
    let pixel = average[y * SIZE + x];
    assert!((pixel[1] - expected).abs() <= 0.05 * expected, "{:?} vs {}", pixel, expected);

    // nothing outside the projection
    let outside = average[50 * SIZE + 50];
    assert_eq!(&outside[..3], &[0.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn translucent_tetrahedron_converges_to_expected_mean() -> anyhow::Result<()> {
    let mut renderer = tetrahedron_renderer(1.0, 200)?;
    let average = render_average(&mut renderer)?;

    let (mut measured, mut expected) = (0.0, 0.0);
    for y in 6..20 {
        for x in 6..20 {
            let lambda = -(ndc(x) + ndc(y)) / 2.0;
            expected += 0.5 * (1.0 - (-0.5 * 2.0 * lambda).exp());
            measured += average[y * SIZE + x][0];
        }
    }
    assert!((measured - expected).abs() <= 0.05 * expected, "{} vs {}", measured, expected);
    Ok(())
}

#[test]
fn uniform_grid_converges_to_slab_opacity() -> anyhow::Result<()> {
    let grid = StructuredVolume::new([2, 2, 2], vec![0.5f32; 8])?
        .with_bounds(Point3f::new(-1.0, -1.0, -1.0), Point3f::new(1.0, 1.0, 1.0))
        .with_value_range(0.0, 1.0);
    let mut engine = UniformGridEngine::with_object(Arc::new(grid.into()))?;
    engine.set_transfer_function(&TransferFunction::gray_ramp(257));
    engine.set_shading(Shading::None);

    let mut renderer = StochasticRenderer::new(RendererConfig::default().with_repetition_level(100))?;
    renderer.add_engine(Box::new(engine));
    let average = render_average(&mut renderer)?;

    // slab thickness 2, density 0.5
    let expected = 0.5 * (1.0 - (-1.0 as Float).exp());
    let mut measured = 0.0;
    for y in 24..40 {
        for x in 24..40 {
            measured += average[y * SIZE + x][0];
        }
    }
    measured /= 256.0;
    assert!((measured - expected).abs() <= 0.05 * expected, "{} vs {}", measured, expected);
    Ok(())
}
