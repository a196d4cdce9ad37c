use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ledgrid::audio::AnalysisMode;
use ledgrid::engine::{HueMapping, SchedulerKind};
use ledgrid::settings::{self, PresetOptions, Prefs, VisualizerOptions};
use ledgrid::viz::{self, TapSource};
use ledgrid::{logging, Result, VizError};

#[derive(Parser)]
#[command(name = "ledgrid")]
#[command(version)]
#[command(about = "Audio-reactive cell grid visualizer", long_about = None)]
struct Cli {
    /// Prefs file to read and write instead of the default location
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the audio-reactive cell grid
    Grid {
        /// Frames per second (1-120)
        #[arg(short, long)]
        frame_rate: Option<f32>,

        /// Cell size in columns (rows count double)
        #[arg(short, long)]
        pitch: Option<u32>,

        /// Input gain multiplier
        #[arg(short, long)]
        gain: Option<f32>,

        /// Threshold damping divisor (1, 2 or 4 are typical)
        #[arg(long)]
        damping: Option<f32>,

        /// Decay milliseconds per unit of intensity
        #[arg(long)]
        decay_scale: Option<f32>,

        /// Frame scheduling: refresh or interval
        #[arg(long)]
        scheduler: Option<String>,

        /// Analysis: waveform or spectrum
        #[arg(long)]
        analysis: Option<String>,

        /// Hue mapping: ratio or product
        #[arg(long)]
        hue: Option<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the preset visualizer
    Presets {
        /// Start with automatic preset rotation on
        #[arg(short, long)]
        auto: bool,

        /// Pick the next preset at random
        #[arg(short, long)]
        randomize: bool,

        /// Mesh preset index (0-5)
        #[arg(short, long)]
        mesh: Option<usize>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Show or change persisted preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Use a synthetic signal instead of the microphone
    #[arg(long)]
    demo: bool,

    /// Random seed for reproducibility
    #[arg(short, long)]
    seed: Option<u64>,

    /// Write a debug log to /tmp/ledgrid.log
    #[arg(long)]
    debug: bool,
}

impl CommonArgs {
    fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }

    fn source(&self, seed: u64) -> TapSource {
        if self.demo {
            TapSource::Demo { seed }
        } else {
            TapSource::Microphone
        }
    }
}

#[derive(Subcommand)]
enum PrefsAction {
    /// List every key with its effective value
    List,
    /// Print one value
    Get { key: String },
    /// Store one value
    Set { key: String, value: String },
    /// Forget one key, or all of them
    Reset { key: Option<String> },
    /// Print the prefs file location
    Path,
}

fn parse_flag<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|v| {
        v.parse().map_err(|_| VizError::InvalidOption {
            key: key.to_string(),
            value: v,
        })
    })
    .transpose()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ledgrid: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let prefs_path = cli.prefs.unwrap_or_else(Prefs::default_path);

    match cli.command {
        Commands::Grid {
            frame_rate,
            pitch,
            gain,
            damping,
            decay_scale,
            scheduler,
            analysis,
            hue,
            common,
        } => {
            logging::init(common.debug)?;
            let prefs = Prefs::load_or_default(&prefs_path);
            let mut options = VisualizerOptions::from_prefs(&prefs);
            if let Some(v) = frame_rate {
                options.frame_rate = v;
            }
            if let Some(v) = pitch {
                options.cell_pitch = v;
            }
            if let Some(v) = gain {
                options.gain = v;
            }
            if let Some(v) = damping {
                options.threshold_damping = v;
            }
            if let Some(v) = decay_scale {
                options.decay_scale = v;
            }
            if let Some(v) = parse_flag::<SchedulerKind>("scheduler", scheduler)? {
                options.scheduler = v;
            }
            if let Some(v) = parse_flag::<AnalysisMode>("analysis", analysis)? {
                options.analysis = v;
            }
            if let Some(v) = parse_flag::<HueMapping>("hue", hue)? {
                options.hue_mapping = v;
            }
            let options = options.clamped();
            let seed = common.seed();
            tracing::info!(?options, seed, "starting grid");
            viz::grid::run(options, prefs, common.source(seed))
        }
        Commands::Presets {
            auto,
            randomize,
            mesh,
            common,
        } => {
            logging::init(common.debug)?;
            let prefs = Prefs::load_or_default(&prefs_path);
            let mut options = PresetOptions::from_prefs(&prefs);
            options.auto_advance |= auto;
            options.randomize |= randomize;
            if let Some(m) = mesh {
                options.mesh = m;
            }
            let options = options.clamped();
            let seed = common.seed();
            tracing::info!(?options, seed, "starting presets");
            viz::presets::run(options, prefs, common.source(seed), seed)
        }
        Commands::Prefs { action } => prefs_command(action, prefs_path),
    }
}

fn prefs_command(action: PrefsAction, path: PathBuf) -> Result<()> {
    let mut prefs = Prefs::load(path)?;
    match action {
        PrefsAction::List => {
            for (key, default) in settings::DEFAULTS {
                match prefs.get(key) {
                    Some(value) => println!("{} = {}", key, value),
                    None => println!("{} = {} (default)", key, default),
                }
            }
        }
        PrefsAction::Get { key } => {
            let value = prefs
                .get(&key)
                .or_else(|| settings::default_for(&key))
                .ok_or_else(|| VizError::InvalidOption {
                    key: key.clone(),
                    value: String::new(),
                })?;
            println!("{}", value);
        }
        PrefsAction::Set { key, value } => {
            prefs.set_checked(&key, &value)?;
            prefs.save()?;
        }
        PrefsAction::Reset { key } => {
            match key {
                Some(key) => {
                    prefs.remove(&key);
                }
                None => prefs.reset(),
            }
            prefs.save()?;
        }
        PrefsAction::Path => println!("{}", prefs.path().display()),
    }
    Ok(())
}
