#![warn(unused_extern_crates)]
use anyhow::Result;
use app::App;
use clap::{Args, Parser, ValueEnum};
use config::{CameraRequest, Delegate, RunningMode};
use draw::{Overlay, draw_face_landmarks, draw_pose_landmarks};
use image::RgbaImage;
use landmark::{LandmarkerResult, bounds};
use pipeline::{FaceLandmarker, OnnxLandmarkers, PoseLandmarker, Task};
use ratatui::DefaultTerminal;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{Level, error, info, span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use ui::Input;
use video::{OutputVideoStream, Resolution, Webcam, composite};

mod app;
mod config;
mod draw;
mod error;
mod landmark;
mod pipeline;
mod shapes;
mod ui;
mod video;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Directory holding the ONNX models
    #[arg(short, long, value_name = "DIR", default_value = "models")]
    models_dir: PathBuf,

    /// Camera index. Uses the last camera found if unset
    #[arg(long)]
    camera: Option<u32>,

    /// Preferred capture width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Preferred capture height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Target frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Run inference on the CPU only
    #[arg(long)]
    cpu: bool,

    /// Inference threads per model, capped at the number of cores
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// File to write logs to. The terminal is taken by the control panel
    #[arg(long, value_name = "FILE", default_value = "posemo.log")]
    log_file: PathBuf,

    #[command(flatten)]
    out: Out,

    /// Process single input frame, reading from input path
    #[arg(short, long, requires = "output")]
    input: Option<PathBuf>,

    /// Landmarks to draw on the single input frame
    #[arg(long, value_enum, default_value = "pose")]
    mode: ImageMode,
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct Out {
    /// Loopback device to write to. Displays in window if unset
    #[arg(group = "dest", short, long)]
    device: Option<String>,

    /// Process single input frame, writing to output path
    #[arg(group = "dest", short, long, requires = "input")]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ImageMode {
    Face,
    Pose,
}

impl From<ImageMode> for Task {
    fn from(mode: ImageMode) -> Task {
        match mode {
            ImageMode::Face => Task::Face,
            ImageMode::Pose => Task::Pose,
        }
    }
}

fn main() -> Result<()> {
    let args = CmdArgs::parse();

    let log_file = File::create(&args.log_file)?;
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .with_env_filter(filter)
        .init();

    let factory = OnnxLandmarkers {
        models_dir: args.models_dir.clone(),
        delegate: if args.cpu {
            Delegate::Cpu
        } else {
            Delegate::Gpu
        },
        threads: args.threads.clamp(1, num_cpus::get()),
    };

    if let (Some(input), Some(output)) = (&args.input, &args.out.output) {
        // Process single image at file and exit
        return process_image(input, output, &factory, args.mode.into());
    }

    let camera = CameraRequest {
        index: args.camera,
        ideal_width: args.width,
        ideal_height: args.height,
        fps: args.fps,
    };
    let mut app = App::new(Webcam::default(), factory, camera);

    let mut terminal = ratatui::init();
    let result = run(&mut terminal, &mut app, args.fps, args.out.device.as_deref());
    ratatui::restore();

    if let Err(e) = &result {
        error!("Exiting: {e:?}");
    }
    result
}

fn run(
    terminal: &mut DefaultTerminal,
    app: &mut App<Webcam, OnnxLandmarkers>,
    fps: u32,
    device: Option<&str>,
) -> Result<()> {
    let frame_interval = Duration::from_secs_f64(1. / fps.max(1) as f64);
    let mut output = None;
    let mut last_written = None;

    loop {
        let span = span!(Level::TRACE, "frame_loop_iter");
        let _guard = span.enter();
        let start = Instant::now();

        terminal.draw(|frame| ui::render(frame, app.buttons(), app.status()))?;

        // the loading status is on screen, now do the blocking work
        if app.has_pending() {
            app.run_pending();
            continue;
        }

        app.tick();

        let media_time = app.media_time();
        if media_time.is_some() && media_time != last_written {
            if let Some((media_time, img)) = app.composite() {
                write_preview(&mut output, &img, device)?;
                last_written = Some(media_time);
            }
        }

        for input in ui::poll_inputs(frame_interval.saturating_sub(start.elapsed()))? {
            match input {
                Input::Quit => return Ok(()),
                Input::Command(command) => {
                    if !app.queue(command) {
                        info!("Ignoring disabled {command:?}");
                    }
                }
            }
        }
    }
}

/// Writes to the preview, reopening it when the frame size changes.
fn write_preview(
    output: &mut Option<OutputVideoStream>,
    img: &RgbaImage,
    device: Option<&str>,
) -> Result<()> {
    let resolution = Resolution {
        width: img.width(),
        height: img.height(),
    };
    if output.as_ref().map(|o| o.resolution()) != Some(resolution) {
        info!(
            "Opening output stream at {}x{}",
            resolution.width, resolution.height
        );
        *output = Some(OutputVideoStream::new(resolution, device)?);
    }

    if let Some(output) = output {
        if let Err(e) = output.write_frame(img) {
            error!("Failed to render frame: {e:?}");
        }
    }

    Ok(())
}

fn process_image(src: &Path, dest: &Path, factory: &OnnxLandmarkers, task: Task) -> Result<()> {
    let span = span!(Level::INFO, "process_image");
    let _guard = span.enter();

    let img = image::open(src)?.into_rgb8();
    let result: LandmarkerResult = match task {
        Task::Face => {
            FaceLandmarker::create_from_options(factory.face_options(RunningMode::Image))?
                .detect(&img)?
                .into()
        }
        Task::Pose => {
            PoseLandmarker::create_from_options(factory.pose_options(RunningMode::Image))?
                .detect(&img)?
                .into()
        }
    };

    let mut overlay = Overlay::new(img.width(), img.height());
    let found = match &result {
        LandmarkerResult::Face(r) => {
            draw_face_landmarks(&mut overlay, r);
            &r.face_landmarks
        }
        LandmarkerResult::Pose(r) => {
            draw_pose_landmarks(&mut overlay, r);
            &r.landmarks
        }
    };

    if result.is_empty() {
        warn!("No {} found in {}", task.label(), src.display());
    }
    for b in found.iter().filter_map(|landmarks| bounds(landmarks)) {
        info!(
            "Found {} centered at ({:.3}, {:.3}), {:.3}x{:.3}",
            task.label(),
            b.x,
            b.y,
            b.w,
            b.h
        );
    }

    composite(&img, overlay.image()).save(dest)?;
    Ok(())
}
