use cgmath::Deg;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use stochastic_renderer::camera::{LookAtCamera, PointLight};
use stochastic_renderer::engine::{LineEngine, ParticleEngine, PolygonEngine, TetrahedraEngine, UniformGridEngine};
use stochastic_renderer::gpu::Device;
use stochastic_renderer::imageio::write_png;
use stochastic_renderer::object::procedural::{
    bounding_box_lines, box_surface, radial_grid, sphere_particles, tetrahedral_cube,
};
use stochastic_renderer::transfer_function::TransferFunction;
use stochastic_renderer::{RendererConfig, StochasticRenderer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scene {
    Tetra,
    Grid,
    Particles,
    Surface,
    All,
}

/// Renders a procedural scene with stochastic passes and writes the averaged frame.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value_t = 512)]
    width: usize,

    #[arg(long, default_value_t = 512)]
    height: usize,

    /// Passes averaged per still frame.
    #[arg(short, long, default_value_t = 16)]
    repetitions: usize,

    /// Passes per frame while the camera rotates; enables LOD control.
    #[arg(long)]
    coarse: Option<usize>,

    /// Still frames rendered after the interactive ones.
    #[arg(long, default_value_t = 4)]
    frames: usize,

    /// Frames rendered while rotating the camera.
    #[arg(long, default_value_t = 0)]
    interactive_frames: usize,

    #[arg(long, value_enum, default_value_t = Scene::Tetra)]
    scene: Scene,

    #[arg(long, default_value_t = 16)]
    resolution: usize,

    #[arg(long)]
    exact_depth: bool,

    #[arg(long, default_value_t = 1024)]
    random_texture_size: usize,

    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    #[arg(short, long, default_value = "render.png")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_tree::HierarchicalLayer::new(2))
        .init();

    let args = Args::parse();

    let mut config = RendererConfig::default()
        .with_repetition_level(args.repetitions)
        .with_random_texture_size(args.random_texture_size)
        .with_random_seed(args.seed)
        .with_exact_depth_testing(args.exact_depth);
    if let Some(coarse) = args.coarse {
        config = config.with_lod(coarse);
    }
    let mut renderer = StochasticRenderer::new(config)?;

    let n = args.resolution;
    if matches!(args.scene, Scene::Tetra | Scene::All) {
        let mut engine = TetrahedraEngine::with_object(Arc::new(tetrahedral_cube(n)?.into()))?;
        engine.set_edge_size(2.0 / n as f32);
        renderer.add_engine(Box::new(engine));
    }
    if matches!(args.scene, Scene::Grid | Scene::All) {
        let mut engine = UniformGridEngine::with_object(Arc::new(radial_grid(n)?.into()))?;
        engine.set_transfer_function(&TransferFunction::gray_ramp(256));
        renderer.add_engine(Box::new(engine));
    }
    if matches!(args.scene, Scene::Particles | Scene::All) {
        let points = sphere_particles(n * n * n * 4, 1.2, args.seed)?.with_size(2.0);
        let mut engine = ParticleEngine::with_object(Arc::new(points.into()))?;
        engine.set_repetition_level(args.repetitions);
        renderer.add_engine(Box::new(engine));
    }
    if matches!(args.scene, Scene::Surface | Scene::All) {
        let surface = box_surface(point(-0.5), point(0.5), [255, 160, 64], 96)?;
        renderer.add_engine(Box::new(PolygonEngine::with_object(Arc::new(surface.into()))?));
    }
    let lines = bounding_box_lines(point(-1.0), point(1.0), [255, 255, 255])?.with_opacity(0.5);
    renderer.add_engine(Box::new(LineEngine::with_object(Arc::new(lines.into()))?));

    let mut device = Device::new();
    let mut camera = LookAtCamera::perspective(args.width, args.height);
    let light = PointLight::default();

    let total = (args.interactive_frames + args.frames) as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} frames {msg}")?
            .progress_chars("##-"),
    );

    let start = std::time::Instant::now();
    for frame in 0..total as usize {
        if frame < args.interactive_frames {
            camera.rotate_y(Deg(5.0));
        }
        let stats = renderer.render_frame(&mut device, &camera, &light)?;
        pb.set_message(format!("ensemble {}", stats.ensemble_count));
        pb.inc(1);
    }
    pb.finish_with_message("done");
    tracing::info!("Rendered {} frames in {} ms", total, start.elapsed().as_millis());

    match device.screen() {
        Some(screen) => write_png(&args.output, screen)?,
        None => anyhow::bail!("no frame was presented"),
    }
    println!("wrote {}", args.output.display());
    renderer.release(&mut device);
    Ok(())
}

fn point(v: f32) -> cgmath::Point3<f32> {
    cgmath::Point3::new(v, v, v)
}
