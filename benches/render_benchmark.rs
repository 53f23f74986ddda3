use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use stochastic_renderer::camera::{LookAtCamera, PointLight};
use stochastic_renderer::engine::{TetrahedraEngine, UniformGridEngine};
use stochastic_renderer::gpu::Device;
use stochastic_renderer::object::procedural::{radial_grid, tetrahedral_cube};
use stochastic_renderer::{RendererConfig, StochasticRenderer};

fn bench(c: &mut Criterion) {
    let camera = LookAtCamera::perspective(128, 128);
    let light = PointLight::default();

    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Elements(4));

    let mut device = Device::new();
    let mut renderer = StochasticRenderer::new(RendererConfig::default().with_repetition_level(4)).unwrap();
    let cube = tetrahedral_cube(8).unwrap();
    renderer.add_engine(Box::new(TetrahedraEngine::with_object(Arc::new(cube.into())).unwrap()));
    group.bench_function("tetrahedral cube", |b| {
        b.iter(|| renderer.render_frame(&mut device, &camera, &light).unwrap())
    });

    let mut device = Device::new();
    let mut renderer = StochasticRenderer::new(RendererConfig::default().with_repetition_level(4)).unwrap();
    let grid = radial_grid(16).unwrap();
    renderer.add_engine(Box::new(UniformGridEngine::with_object(Arc::new(grid.into())).unwrap()));
    group.bench_function("radial grid", |b| {
        b.iter(|| renderer.render_frame(&mut device, &camera, &light).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench);
criterion_main!(benches);
