use anyhow::{bail, Context, Result};
use attendify_core::{OnnxExtractor, RosterBuilder, StudentId, StudentRecord};
use attendify_hw::{V4l2Camera, V4l2Opener};
use attendifyd::{CameraSession, LogObserver, LoopSettings, ScanLimits};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

#[derive(Parser)]
#[command(name = "attendify", about = "Attendify attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Build a roster from a directory of student photos and report who was skipped
    Check {
        /// Directory of images named after the student id (e.g. 1024.jpg)
        dir: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Run a single bounded scan against a directory of student photos
    Scan {
        dir: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Maximum signature distance for a match
        #[arg(short, long, default_value_t = attendify_core::DEFAULT_TOLERANCE)]
        tolerance: f32,
        /// Stop after this many frames
        #[arg(long, default_value_t = 300)]
        max_frames: usize,
        /// Stop after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, default_value_os_t = attendify_core::default_model_dir())]
    model_dir: PathBuf,
}

impl ModelArgs {
    fn load(&self) -> Result<OnnxExtractor> {
        let scrfd = self.model_dir.join("det_10g.onnx");
        let arcface = self.model_dir.join("w600k_r50.onnx");
        OnnxExtractor::load(&scrfd.to_string_lossy(), &arcface.to_string_lossy())
            .with_context(|| format!("failed to load face models from {}", self.model_dir.display()))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = V4l2Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Check { dir, models } => {
            let students = load_students(&dir)?;
            let extractor = models.load()?;
            let build = RosterBuilder::new(&extractor).build_report(&students)?;
            tracing::info!(
                dir = %dir.display(),
                enrolled = build.roster.len(),
                skipped = build.skipped.len(),
                "roster check finished"
            );

            println!("{} of {} students enrolled", build.roster.len(), students.len());
            for entry in build.roster.iter() {
                println!("  ok    {}", entry.student_id);
            }
            for (id, reason) in &build.skipped {
                println!("  skip  {id}: {reason}");
            }
        }
        Commands::Scan {
            dir,
            models,
            device,
            tolerance,
            max_frames,
            timeout,
        } => {
            let students = load_students(&dir)?;
            let session = CameraSession::new(
                Arc::new(V4l2Opener::new(device)),
                Arc::new(models.load()?),
                Arc::new(LogObserver),
                LoopSettings {
                    tolerance,
                    ..LoopSettings::default()
                },
            );
            let limits = ScanLimits {
                max_frames: Some(max_frames),
                timeout: Some(Duration::from_secs(timeout)),
            };

            tracing::info!(students = students.len(), ?limits, "starting scan");
            let matched = session.scan_once(&students, limits)?;
            tracing::info!(matched = matched.len(), "scan finished");
            println!("{}", serde_json::json!({ "matched_ids": matched }));
        }
    }

    Ok(())
}

/// One student per image file, id and name taken from the file stem.
fn load_students(dir: &Path) -> Result<Vec<StudentRecord>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!("no student images in {}", dir.display());
    }

    paths
        .iter()
        .map(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let id = stem
                .parse::<i64>()
                .map(StudentId::from)
                .unwrap_or_else(|_| StudentId::from(stem.clone()));
            Ok(StudentRecord {
                id,
                full_name: stem,
                regno: String::new(),
                image: STANDARD.encode(bytes),
            })
        })
        .collect()
}
