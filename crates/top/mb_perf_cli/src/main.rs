//! Builds a synthetic voxel scene under the performance monitor, then prints a
//! report and the exported session.
//!
//! ```text
//! mb_perf --render-mode batch --chunks 64 --output session.json
//! ```

mod mesher;
mod renderer;
mod report;
mod workload;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use mb_perf_monitor::{FrameQueue, MonitorConfig, PerformanceMonitor, ProcessMemoryProbe};
use mb_perf_session::RenderMode;

use crate::mesher::Mesher;
use crate::renderer::SimulatedRenderer;

#[derive(Debug, clap::Parser)]
#[clap(author, version, about)]
struct Args {
    /// Name of the thing being built, used as the session id prefix.
    #[clap(long, default_value = "demo")]
    subject: String,

    /// `incremental`, `batch` or `instanced`.
    #[clap(long, default_value_t = RenderMode::Incremental)]
    render_mode: RenderMode,

    #[clap(long, default_value_t = 16)]
    chunks: usize,

    /// Edge length of a chunk, in blocks.
    #[clap(long, default_value_t = 8)]
    chunk_size: i32,

    /// Frame rate of the simulated render loop.
    #[clap(long, default_value_t = 60)]
    fps: u32,

    /// Simulated cost of merging one chunk.
    #[clap(long, default_value_t = 25)]
    chunk_delay_ms: u64,

    /// How long to keep rendering after the build, so the samplers get some data.
    #[clap(long, default_value_t = 1200)]
    linger_ms: u64,

    /// Seed of the terrain generator.
    #[clap(long, default_value_t = 0)]
    seed: u64,

    /// Report the resident memory of this process instead of the simulated scene's.
    #[clap(long, default_value_t = false)]
    process_memory: bool,

    /// Write the exported session here instead of to stdout.
    #[clap(long)]
    output: Option<PathBuf>,

    #[clap(flatten)]
    monitor: MonitorConfig,
}

fn main() -> anyhow::Result<()> {
    mb_log::setup_logging();

    use clap::Parser as _;
    let args = Args::parse();

    run(&args)
}

fn run(args: &Args) -> anyhow::Result<()> {
    let frames = Arc::new(FrameQueue::default());
    let renderer = Arc::new(SimulatedRenderer::default());

    let builder = PerformanceMonitor::builder(args.monitor.clone())
        .with_frame_source(frames.clone())
        .with_renderer_probe(renderer.clone());
    let monitor = if args.process_memory {
        builder.with_memory_probe(Arc::new(ProcessMemoryProbe))
    } else {
        builder.with_memory_probe(renderer.clone())
    }
    .build();

    let rendering = Arc::new(AtomicBool::new(true));
    let render_thread = std::thread::Builder::new()
        .name("render_loop".to_owned())
        .spawn({
            let frames = Arc::clone(&frames);
            let rendering = Arc::clone(&rendering);
            let frame_time = Duration::from_secs(1) / args.fps.max(1);
            move || {
                while rendering.load(Ordering::Relaxed) {
                    frames.present();
                    std::thread::sleep(frame_time);
                }
            }
        })
        .context("failed to spawn the render loop")?;

    let scene = workload::generate_scene(args.chunks, args.chunk_size.max(1), args.seed);
    mb_log::info!(
        "Building {} chunks ({} blocks) in {} mode",
        scene.len(),
        scene.iter().map(|chunk| chunk.blocks.len()).sum::<usize>(),
        args.render_mode
    );

    let id = monitor.start_session(&args.subject, args.render_mode);
    Mesher {
        monitor: &monitor,
        renderer: &renderer,
        render_mode: args.render_mode,
        merge_delay: Duration::from_millis(args.chunk_delay_ms),
    }
    .build(&scene);
    std::thread::sleep(Duration::from_millis(args.linger_ms));

    // Only counted while the session is current.
    let dropped_samples = monitor.dropped_samples();
    let session = monitor
        .end_session(Some(&id))
        .with_context(|| format!("session {id} was not running"))?;

    rendering.store(false, Ordering::Relaxed);
    if render_thread.join().is_err() {
        mb_log::warn!("The render loop panicked");
    }

    eprintln!("{}", report::render(&session, dropped_samples));

    let json = monitor
        .export_session_data(&id)
        .context("failed to export the session")?;
    if let Some(path) = &args.output {
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        mb_log::info!("Session written to {}", path.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
