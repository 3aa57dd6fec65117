use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use motion_lab_core::devices::{MannequinDetector, SyntheticBackend, SyntheticOptions};
use motion_lab_core::media::decode_file;
use motion_lab_core::pose::NoModel;
use motion_lab_core::{
    AppConfig, DetectorFactory, DeviceBackend, Pipeline, RenderSink, RenderState,
    SceneLayout, SpectralTransform, StatusBadge, StatusTone, Viewport,
};
use tracing_subscriber::EnvFilter;

const AVATAR_VIEW: Viewport = Viewport::new(600.0, 500.0);
const SKELETON_VIEW: Viewport = Viewport::new(480.0, 480.0);
const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

fn main() -> motion_lab_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Inspect { input } => run_inspect(&input),
    }
}

fn run_live(args: LiveArgs) -> motion_lab_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };
    if let Some(model) = &args.model {
        config.pose.model_path = Some(model.clone());
    }
    config.validate()?;
    tracing::info!(synthetic = args.synthetic, frames = args.frames, "starting live mode");

    let every = u64::from(config.display.refresh_hz);
    let sink = TerminalSink {
        every,
        min_confidence: config.pose.min_confidence,
    };
    let backend = backend(&args, &config);
    let detector = detector(&args, &config);
    let mut pipeline = Pipeline::new(config, backend, detector, Box::new(sink))?;

    if let Some(path) = &args.audio {
        let status = pipeline.load_audio_file(path);
        report(&status);
        if status.tone == StatusTone::Warning && pipeline.manager().media_name().is_some() {
            report(&pipeline.play_audio());
        }
    }
    if args.microphone {
        report(&pipeline.toggle_microphone());
    }
    if args.camera {
        report(&pipeline.toggle_camera());
        println!("{}", pipeline.camera_caption());
    }

    let refresh = pipeline.refresh_interval();
    let mut last = Instant::now();
    for _ in 0..args.frames {
        let started = Instant::now();
        pipeline.run_frame(started - last);
        last = started;
        if let Some(remaining) = refresh.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }

    pipeline.shutdown();
    report(pipeline.status());
    Ok(())
}

fn backend(args: &LiveArgs, config: &AppConfig) -> Box<dyn DeviceBackend> {
    let synthetic = SyntheticBackend::new(SyntheticOptions {
        playback_chunk: config.audio.playback_chunk,
        ..Default::default()
    });

    #[cfg(feature = "devices")]
    if !args.synthetic {
        return Box::new(motion_lab_core::devices::HostBackend::new(Box::new(synthetic)));
    }

    #[cfg(not(feature = "devices"))]
    if !args.synthetic {
        tracing::warn!("built without the `devices` feature, using synthetic devices");
    }
    Box::new(synthetic)
}

fn detector(args: &LiveArgs, config: &AppConfig) -> Box<dyn DetectorFactory> {
    if config.pose.model_path.is_some() {
        #[cfg(feature = "movenet")]
        return Box::new(motion_lab_core::pose::movenet::MoveNetFactory);

        #[cfg(not(feature = "movenet"))]
        tracing::warn!("built without the `movenet` feature, ignoring the pose model");
    }
    if args.synthetic {
        Box::new(MannequinDetector::load)
    } else {
        Box::new(NoModel)
    }
}

fn report(status: &StatusBadge) {
    match status.tone {
        StatusTone::Warning => tracing::warn!(status = %status, "pipeline status"),
        StatusTone::Success | StatusTone::Neutral => {
            tracing::info!(status = %status, "pipeline status")
        }
    }
}

/// Prints a one-line summary of the scene about once a second.
struct TerminalSink {
    every: u64,
    min_confidence: f32,
}

impl RenderSink for TerminalSink {
    fn render(&mut self, state: &RenderState) {
        if state.frame.index % self.every.max(1) != 0 {
            return;
        }
        let scene = SceneLayout::compute(state, AVATAR_VIEW, SKELETON_VIEW, self.min_confidence);
        let bars: String = scene
            .avatar
            .bars
            .iter()
            .map(|bar| {
                let level = (bar.height / 80.0 * (LEVELS.len() - 1) as f32).round() as usize;
                LEVELS[level.min(LEVELS.len() - 1)]
            })
            .collect();
        let pose = match scene.skeleton.hint {
            Some(hint) => hint.to_string(),
            None => format!(
                "{} joints, {} bones",
                scene.skeleton.joints.len(),
                scene.skeleton.bones.len()
            ),
        };
        println!(
            "[{:>6.2}s] loudness {:.2} mouth {:>5.1}px |{}| {}",
            state.frame.time.as_secs_f32(),
            state.audio.loudness,
            scene.avatar.mouth.depth,
            bars,
            pose
        );
    }
}

fn run_inspect(input: &Path) -> motion_lab_core::Result<()> {
    tracing::info!(?input, "inspecting audio file");
    let audio = decode_file(input)?;
    let config = AppConfig::live_defaults().audio;
    let mut transform = SpectralTransform::new(&config)?;
    let mut bins = vec![0_u8; transform.bin_count()];

    let mut windows = 0_usize;
    let mut total = 0.0_f32;
    let mut peak = 0.0_f32;
    for window in audio.samples().chunks_exact(transform.fft_size()) {
        transform.byte_frequency_data(window, &mut bins)?;
        let loudness = motion_lab_core::analysis::loudness(&bins);
        total += loudness;
        peak = peak.max(loudness);
        windows += 1;
    }
    let mean = if windows == 0 { 0.0 } else { total / windows as f32 };

    println!("file:        {}", input.display());
    println!("sample rate: {} Hz", audio.sample_rate());
    println!("duration:    {:.2}s", audio.duration().as_secs_f64());
    println!("windows:     {windows}");
    println!("loudness:    mean {mean:.3}, peak {peak:.3}");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio and pose driven avatar pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live pipeline for a fixed number of display refreshes.
    Live(LiveArgs),
    /// Decode an audio file and report its analysis summary.
    Inspect {
        /// Path to the audio file to decode.
        input: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct LiveArgs {
    /// Start the microphone on launch.
    #[arg(long)]
    microphone: bool,
    /// Start the camera on launch.
    #[arg(long)]
    camera: bool,
    /// Audio file to load and play.
    #[arg(long)]
    audio: Option<PathBuf>,
    /// MoveNet ONNX model used for pose estimation.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Number of display refreshes to run before shutting down.
    #[arg(long, default_value_t = 300)]
    frames: u64,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use generated devices instead of real hardware.
    #[arg(long)]
    synthetic: bool,
}
