use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use strum::IntoEnumIterator;

use kws_edge::audio::{
    AudioCaptureBuffer, AudioSource, Pacing, SyntheticConfig, SyntheticSource, WakeFlag,
    WavFileSource,
};
use kws_edge::clock::MonotonicClock;
use kws_edge::detection::{CycleOutcome, DetectionPipeline};
use kws_edge::models::{ClassId, InferenceEngine, QuantizedModel, CLASS_COUNT};
use kws_edge::KwsConfig;

#[derive(Parser)]
#[command(name = "kws-edge")]
#[command(about = "On-device keyword spotting (silence / unknown / yes / no)")]
struct Cli {
    /// JSON configuration file (missing fields keep their defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Calibrate, then classify audio until the source ends or the cycle limit is hit
    Run(RunArgs),
    /// Write a small seeded model blob sized for the current configuration
    DemoModel {
        /// Output path
        out: PathBuf,
        #[arg(long, default_value = "7")]
        seed: u64,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Model file (overrides model.model_path)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Read audio from a 16-bit mono WAV file
    #[arg(long, conflicts_with_all = ["synthetic", "mic"])]
    wav: Option<PathBuf>,

    /// Play WAV/synthetic audio this many times faster than real time
    #[arg(long, default_value = "1")]
    speedup: u32,

    /// Generate noise with periodic tone bursts
    #[arg(long)]
    synthetic: bool,

    /// Capture from the default (or --device) microphone
    #[arg(long)]
    mic: bool,

    /// Input device name for --mic
    #[arg(long, requires = "mic")]
    device: Option<String>,

    /// Stop after this many cycles
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Override model.confidence_threshold
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match KwsConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }
        },
        None => KwsConfig::default(),
    };
    if let Command::Run(args) = &cli.command {
        if args.verbose {
            config.logging.debug_enabled = true;
        }
    }

    env_logger::Builder::new()
        .filter_level(config.logging.level_filter())
        .parse_default_env()
        .init();

    let result = match cli.command {
        Command::Run(args) => run(config, args),
        Command::DemoModel { out, seed } => demo_model(&config, out, seed),
    };

    if let Err(e) = result {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn run(mut config: KwsConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(model) = &args.model {
        config.model.model_path = Some(model.clone());
    }
    if let Some(threshold) = args.threshold {
        config.model.confidence_threshold = threshold;
    }
    config.validate().context("Invalid configuration")?;

    info!("🚀 Starting kws-edge");
    let engine = InferenceEngine::from_config(&config).context("Failed to load model")?;

    let (producer, consumer) = AudioCaptureBuffer::new(&config.audio)?;
    let pacing = match args.speedup {
        0 | 1 => Pacing::RealTime,
        n => Pacing::Speedup(n),
    };
    let source = select_source(&config, &args, pacing)?;
    info!("🎧 Audio source: {}", source.name());
    let mut handle = source.start(producer)?;

    // Enter on stdin plays the role of the wake button
    let wake = WakeFlag::new();
    spawn_wake_button(wake.clone());

    let mut pipeline = DetectionPipeline::new(
        &config,
        engine,
        consumer,
        wake,
        Box::new(MonotonicClock::new()),
    )?;

    let stats = pipeline.run(args.max_cycles, |outcome| {
        if let Some(result) = outcome.result() {
            if result.class_id.is_keyword() {
                println!(
                    "{:>8} ms  {:<8} {:.2}",
                    result.timestamp_ms, result.class_id, result.confidence
                );
            }
        }
        // Keep going until the source is exhausted and the buffer is empty
        !(handle.is_finished() && matches!(outcome, CycleOutcome::NoFrame { .. }))
    });
    handle.stop();

    for class in ClassId::iter() {
        info!("   {:<8} {}", class, stats.count(class));
    }
    Ok(())
}

fn spawn_wake_button(wake: WakeFlag) {
    let spawned = std::thread::Builder::new()
        .name("wake-button".to_string())
        .spawn(move || {
            let mut line = String::new();
            while matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                info!("🔔 Wake button pressed");
                wake.request();
                line.clear();
            }
        });
    if let Err(e) = spawned {
        log::warn!("⚠️ No wake button: {}", e);
    }
}

fn select_source(
    config: &KwsConfig,
    args: &RunArgs,
    pacing: Pacing,
) -> anyhow::Result<Box<dyn AudioSource>> {
    if let Some(path) = &args.wav {
        let source = WavFileSource::open(path, config.audio.sample_rate, config.audio.frame_size, pacing)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        return Ok(Box::new(source));
    }

    if args.mic {
        #[cfg(feature = "microphone")]
        {
            use kws_edge::audio::{MicrophoneConfig, MicrophoneSource};
            return Ok(Box::new(MicrophoneSource::new(MicrophoneConfig {
                device_name: args.device.clone(),
                channel: 0,
                sample_rate: config.audio.sample_rate,
            })));
        }
        #[cfg(not(feature = "microphone"))]
        anyhow::bail!("Built without microphone support (enable the `microphone` feature)");
    }

    if !args.synthetic {
        info!("ℹ️ No audio source given, using --synthetic");
    }
    Ok(Box::new(SyntheticSource::new(SyntheticConfig {
        sample_rate: config.audio.sample_rate,
        pacing,
        ..SyntheticConfig::default()
    })))
}

fn demo_model(config: &KwsConfig, out: PathBuf, seed: u64) -> anyhow::Result<()> {
    let model = QuantizedModel::demo(config.features.feature_size, CLASS_COUNT, seed)?;
    let bytes = model.encode();
    std::fs::write(&out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    info!(
        "💾 Wrote {} ({} bytes, {} inputs, {} classes)",
        out.display(),
        bytes.len(),
        config.features.feature_size,
        CLASS_COUNT
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            Command::DemoModel { .. } => panic!("expected the run subcommand"),
        }
    }

    #[test]
    fn test_model_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("absent.kwsq");
        let wav = dir.path().join("absent.wav");
        let args = run_args(&[
            "kws-edge",
            "run",
            "--model",
            model.to_str().unwrap(),
            "--wav",
            wav.to_str().unwrap(),
        ]);

        let err = run(KwsConfig::default(), args).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to load model"), "{}", message);
        assert!(message.contains("absent.kwsq"), "{}", message);
    }

    #[test]
    fn test_wav_source_selected_after_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav, spec).unwrap();
        for _ in 0..1024 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let args = run_args(&[
            "kws-edge",
            "run",
            "--model",
            "unused.kwsq",
            "--wav",
            wav.to_str().unwrap(),
        ]);
        let source = select_source(&KwsConfig::default(), &args, Pacing::RealTime).unwrap();
        assert_eq!(source.name(), "wav");
    }
}
