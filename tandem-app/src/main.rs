//! Tandem
//!
//! Records a USB camera and a ToF depth camera side by side.
//!
//! Modes:
//! - `sync`: both cameras in lockstep, only matched frame pairs are written
//! - `dual`: both cameras free-running on their own threads
//! - `usb` / `tof`: a single camera (`tof --raw` keeps lossless 16-bit planes)
//! - `probe`, `snapshot`, `list`: hardware checks

mod app;
mod config;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tandem_record::Colormap;

/// Tandem - paired USB and ToF camera recorder
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record both cameras in lockstep
    Sync(RecordArgs),
    /// Record both cameras independently, one thread each
    Dual(RecordArgs),
    /// Record the USB camera only
    Usb(RecordArgs),
    /// Record the ToF camera only
    Tof {
        #[command(flatten)]
        record: RecordArgs,

        /// Dump 16-bit planes as PNG plus JSON statistics instead of video
        #[arg(long)]
        raw: bool,

        /// Stop a raw dump after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
    },
    /// Check that the cameras open and deliver frames
    Probe(ProbeArgs),
    /// Save one converted frame per stream as PNG
    Snapshot(SnapshotArgs),
    /// List camera devices
    List,
}

#[derive(ClapArgs, Debug, Default)]
pub struct RecordArgs {
    /// Recording length in seconds (0 records until Ctrl-C)
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Cycle rate of synchronized recording
    #[arg(long)]
    pub fps: Option<f32>,

    /// Stop synchronized recording after this many cycles
    #[arg(long)]
    pub max_cycles: Option<u64>,

    /// Webcam index
    #[arg(long)]
    pub usb_index: Option<u32>,

    /// ToF device path or index
    #[arg(long)]
    pub tof_device: Option<String>,

    /// Depth color map (jet, hot); gray when unset
    #[arg(long)]
    pub colormap: Option<Colormap>,

    /// Use generated test patterns instead of cameras
    #[arg(long)]
    pub synthetic: bool,

    /// Also write the session summary as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Camera {
    Usb,
    Tof,
}

#[derive(ClapArgs, Debug)]
pub struct ProbeArgs {
    /// Probe a single camera
    #[arg(long, value_enum)]
    pub only: Option<Camera>,

    /// How long to wait for the first frame, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    #[arg(long)]
    pub synthetic: bool,

    /// Write probe results as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct SnapshotArgs {
    #[arg(value_enum)]
    pub camera: Camera,

    /// Output directory
    #[arg(short, long, default_value = "snapshots")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    #[arg(long)]
    pub colormap: Option<Colormap>,

    #[arg(long)]
    pub synthetic: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = app::run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
