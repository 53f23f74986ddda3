use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use stochastic_renderer::camera::{LookAtCamera, PointLight};
use stochastic_renderer::engine::{
    EngineType, FrameContext, LineEngine, RenderEngine, SharedResources, TetrahedraEngine,
};
use stochastic_renderer::gpu::{Device, RenderTarget};
use stochastic_renderer::object::{CellType, LineObject, LineType, RenderObject, UnstructuredVolume};
use stochastic_renderer::shading::Shading;
use stochastic_renderer::transfer_function::TransferFunction;
use stochastic_renderer::{
    DeviceError, Float, Point3f, RenderError, RendererConfig, Result, StochasticRenderer,
};

#[derive(Debug, Clone, PartialEq)]
struct DrawEvent {
    engine: EngineType,
    snapshot: Option<Float>,
    jitter: [u32; 2],
    pass_index: usize,
    first: bool,
}

type Log = Arc<Mutex<Vec<DrawEvent>>>;

/// Engine that records what it sees instead of drawing geometry.
struct Recorder {
    engine: EngineType,
    log: Log,
    write_depth: bool,
    fail_draw: bool,
    fail_setup: bool,
    count: usize,
}

impl Recorder {
    fn new(engine: EngineType, log: &Log) -> Self {
        Self {
            engine,
            log: log.clone(),
            write_depth: false,
            fail_draw: false,
            fail_setup: false,
            count: 0,
        }
    }
}

impl RenderEngine for Recorder {
    fn engine_type(&self) -> EngineType {
        self.engine
    }

    fn object(&self) -> Option<&Arc<RenderObject>> {
        None
    }

    fn setup(&mut self, _device: &mut Device, _shared: &SharedResources) -> Result<()> {
        if self.fail_setup {
            return Err(DeviceError::InvalidHandle { kind: "recorder program" }.into());
        }
        Ok(())
    }

    fn build_buffers(&mut self, _device: &mut Device) -> Result<()> {
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        false
    }

    fn clear_ensemble(&mut self) {
        self.count = 0;
    }

    fn repetition_count(&self) -> usize {
        self.count
    }

    fn set_render_size(&mut self, _width: usize, _height: usize) {}

    fn draw(&mut self, ctx: &FrameContext, target: &mut RenderTarget<'_>) -> Result<()> {
        self.log.lock().unwrap().push(DrawEvent {
            engine: self.engine,
            snapshot: target.snapshot_depth_at(0, 0),
            jitter: ctx.jitter,
            pass_index: ctx.pass_index,
            first: ctx.is_first_pass_of_ensemble,
        });
        if self.fail_draw {
            return Err(RenderError::StepOutOfRange { step: 1, steps: 0 });
        }
        if self.write_depth {
            target.write(0, 0, [1.0, 0.0, 0.0, 1.0], 0.25);
        }
        self.count += 1;
        Ok(())
    }

    fn release(&mut self, _device: &mut Device) {}
}

fn events(log: &Log) -> Vec<DrawEvent> {
    log.lock().unwrap().clone()
}

fn recording_renderer(config: RendererConfig, log: &Log) -> anyhow::Result<StochasticRenderer> {
    let mut renderer = StochasticRenderer::new(config.with_random_texture_size(64))?;
    renderer.add_engine(Box::new(Recorder::new(EngineType::Tetrahedra, log)));
    renderer.add_engine(Box::new(Recorder { write_depth: true, ..Recorder::new(EngineType::Line, log) }));
    renderer.add_engine(Box::new(Recorder::new(EngineType::Point, log)));
    Ok(renderer)
}

#[test]
fn surfaces_draw_before_volumes() -> anyhow::Result<()> {
    let log = Log::default();
    let mut renderer = recording_renderer(RendererConfig::default().with_repetition_level(2), &log)?;
    let mut device = Device::new();
    renderer.render_frame(&mut device, &LookAtCamera::perspective(8, 8), &PointLight::default())?;

    let order: Vec<_> = events(&log).iter().map(|e| e.engine).collect();
    assert_eq!(
        order,
        vec![
            EngineType::Point,
            EngineType::Line,
            EngineType::Tetrahedra,
            EngineType::Point,
            EngineType::Line,
            EngineType::Tetrahedra,
        ]
    );
    let first: Vec<_> = events(&log).iter().map(|e| (e.pass_index, e.first)).collect();
    assert_eq!(first, vec![(0, true), (0, true), (0, true), (1, false), (1, false), (1, false)]);
    Ok(())
}

#[test]
fn volumes_see_surface_depth_only_in_exact_mode() -> anyhow::Result<()> {
    let log = Log::default();
    let mut renderer = recording_renderer(RendererConfig::default().with_exact_depth_testing(true), &log)?;
    let mut device = Device::new();
    let camera = LookAtCamera::perspective(8, 8);
    renderer.render_frame(&mut device, &camera, &PointLight::default())?;

    let seen: Vec<_> = events(&log).iter().map(|e| (e.engine, e.snapshot)).collect();
    assert_eq!(
        seen,
        vec![(EngineType::Point, None), (EngineType::Line, None), (EngineType::Tetrahedra, Some(0.25))]
    );

    log.lock().unwrap().clear();
    renderer.disable_exact_depth_testing();
    renderer.render_frame(&mut device, &camera, &PointLight::default())?;
    assert!(events(&log).iter().all(|e| e.snapshot.is_none()));
    Ok(())
}

#[test]
fn failing_draw_skips_only_that_engine() -> anyhow::Result<()> {
    let log = Log::default();
    let mut renderer = StochasticRenderer::new(RendererConfig::default().with_repetition_level(3).with_random_texture_size(64))?;
    renderer.add_engine(Box::new(Recorder { fail_draw: true, ..Recorder::new(EngineType::Line, &log) }));
    renderer.add_engine(Box::new(Recorder::new(EngineType::Tetrahedra, &log)));

    let mut device = Device::new();
    let stats = renderer.render_frame(&mut device, &LookAtCamera::perspective(8, 8), &PointLight::default())?;
    assert_eq!(stats.failed_engines, 3);
    assert_eq!(stats.ensemble_count, 3);
    assert_eq!(renderer.engine(1).map(|e| e.repetition_count()), Some(3));
    assert_eq!(events(&log).len(), 6);
    Ok(())
}

#[test]
fn setup_failure_is_reported() -> anyhow::Result<()> {
    let log = Log::default();
    let mut renderer = StochasticRenderer::new(RendererConfig::default().with_random_texture_size(64))?;
    renderer.add_engine(Box::new(Recorder { fail_setup: true, ..Recorder::new(EngineType::UniformGrid, &log) }));

    let mut device = Device::new();
    match renderer.render_frame(&mut device, &LookAtCamera::perspective(8, 8), &PointLight::default()) {
        Err(RenderError::EngineSetup { engine, .. }) => assert_eq!(engine, "uniform grid"),
        other => panic!("expected a setup error, got {:?}", other),
    }
    assert!(events(&log).is_empty());
    Ok(())
}

#[test]
fn disabled_random_texture_keeps_jitter_fixed() -> anyhow::Result<()> {
    let log = Log::default();
    let config = RendererConfig::default().with_repetition_level(4).with_random_texture(false);
    let mut renderer = StochasticRenderer::new(config.with_random_texture_size(64))?;
    renderer.add_engine(Box::new(Recorder::new(EngineType::Tetrahedra, &log)));

    let mut device = Device::new();
    renderer.render_frame(&mut device, &LookAtCamera::perspective(8, 8), &PointLight::default())?;
    assert!(events(&log).iter().all(|e| e.jitter == [0, 0]));

    log.lock().unwrap().clear();
    renderer.enable_random_texture();
    renderer.render_frame(&mut device, &LookAtCamera::perspective(8, 8), &PointLight::default())?;
    let jitters: Vec<_> = events(&log).iter().map(|e| e.jitter).collect();
    assert_eq!(jitters[0], [0, 0]);
    assert_eq!(jitters[1], [12347 % 64, (12347 / 64) % 64]);
    Ok(())
}

#[test]
fn out_of_memory_is_reported() -> anyhow::Result<()> {
    let log = Log::default();
    let mut renderer = recording_renderer(RendererConfig::default(), &log)?;
    let mut device = Device::with_memory_budget(1024);
    match renderer.render_frame(&mut device, &LookAtCamera::perspective(8, 8), &PointLight::default()) {
        Err(RenderError::Device(DeviceError::OutOfMemory { requested, .. })) => assert!(requested > 1024),
        other => panic!("expected out of memory, got {:?}", other),
    }
    Ok(())
}

/// Opaque red line at `z = 0` crossing the lower-left corner tetrahedron,
/// which spans `z` from 1 down to -1 along the view direction.
fn line_through_volume_renderer(exact: bool) -> anyhow::Result<StochasticRenderer> {
    let volume = UnstructuredVolume::new(
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
    .with_value_range(0.0, 1.0);
    let mut tetra = TetrahedraEngine::with_object(Arc::new(volume.into()))?;
    tetra.set_transfer_function(&TransferFunction::gray_ramp(257));
    tetra.set_edge_size(0.5);
    tetra.set_shading(Shading::None);

    let line = LineObject::new(
        LineType::Strip,
        vec![Point3f::new(-1.0, -0.49, 0.0), Point3f::new(1.0, -0.49, 0.0)],
        vec![],
        vec![[255, 0, 0]],
    )?;

    let config = RendererConfig::default().with_repetition_level(100).with_exact_depth_testing(exact);
    let mut renderer = StochasticRenderer::new(config)?;
    renderer.add_engine(Box::new(tetra));
    renderer.add_engine(Box::new(LineEngine::with_object(Arc::new(line.into()))?));
    Ok(renderer)
}

fn green_along_line(exact: bool) -> anyhow::Result<Float> {
    let mut renderer = line_through_volume_renderer(exact)?;
    let mut device = Device::new();
    renderer.render_frame(&mut device, &LookAtCamera::orthographic(1.0, 64, 64), &PointLight::default())?;
    let average = renderer
        .ensemble()
        .average(&device)
        .ok_or_else(|| anyhow::anyhow!("ensemble buffer not allocated"))?;
    Ok((1..6).map(|x| average[16 * 64 + x][1]).sum::<Float>() / 5.0)
}

#[test]
fn exact_depth_truncates_volume_behind_line() -> anyhow::Result<()> {
    let approximate = green_along_line(false)?;
    let exact = green_along_line(true)?;
    // the volume in front of the line thins from about 1.35 to 1.0 units
    assert!(exact + 0.02 < approximate, "exact {} approximate {}", exact, approximate);
    assert!(exact > 0.25, "exact {}", exact);
    Ok(())
}

#[test]
fn polygons_draw_with_surfaces() -> anyhow::Result<()> {
    let log = Log::default();
    let mut renderer = StochasticRenderer::new(
        RendererConfig::default().with_exact_depth_testing(true).with_random_texture_size(64),
    )?;
    renderer.add_engine(Box::new(Recorder::new(EngineType::Tetrahedra, &log)));
    renderer.add_engine(Box::new(Recorder { write_depth: true, ..Recorder::new(EngineType::Polygon, &log) }));
    renderer.add_engine(Box::new(Recorder::new(EngineType::Line, &log)));

    let mut device = Device::new();
    renderer.render_frame(&mut device, &LookAtCamera::perspective(8, 8), &PointLight::default())?;
    let seen: Vec<_> = events(&log).iter().map(|e| (e.engine, e.snapshot)).collect();
    assert_eq!(
        seen,
        vec![(EngineType::Line, None), (EngineType::Polygon, None), (EngineType::Tetrahedra, Some(0.25))]
    );
    Ok(())
}
