//! Command-line configuration for the `remy` and `rat-runner` binaries, and
//! the process-wide logger switch.

use std::path::PathBuf;
use std::time::Duration;

use tracing::level_filters::LevelFilter;

use crate::simulation::SimLinkConfig;
use crate::transport::rat::GangConfig;
use crate::whisker::{InsertMode, LoadMode};

/// Arguments of `rat-runner`: load a rule table and drive a sender gang over
/// a simulated link.
#[derive(clap::Parser, Debug, Clone)]
#[command(name = "rat-runner", version, about)]
pub struct RunnerArgs {
    /// Rule table written by `remy`.
    #[arg(long = "if", value_name = "PATH", env = "REMY_WHISKERS")]
    pub whiskers: PathBuf,

    /// Bottleneck rate in packets per millisecond.
    #[arg(long = "link", value_name = "PPT", default_value_t = 1.0, env = "REMY_LINK_PPT")]
    pub link_ppt: f64,

    /// Round-trip propagation delay in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 150.0, env = "REMY_RTT")]
    pub rtt: f64,

    /// Number of senders sharing the controller.
    #[arg(long = "nsrc", default_value_t = 8, env = "REMY_NUM_SENDERS")]
    pub num_senders: usize,

    /// Mean "on" period in milliseconds.
    #[arg(long = "on", value_name = "MS", default_value_t = 5000.0)]
    pub mean_on: f64,

    /// Mean "off" period in milliseconds.
    #[arg(long = "off", value_name = "MS", default_value_t = 5000.0)]
    pub mean_off: f64,

    /// Length of the run in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub duration: u64,

    /// Seed for on/off switching and link loss.
    #[arg(long, default_value_t = 0, env = "REMY_SEED")]
    pub seed: u64,

    /// Probability that the link loses a packet.
    #[arg(long, value_name = "FRACTION", default_value_t = 0.0)]
    pub loss: f64,

    /// Fail on the first conflicting rule instead of skipping it.
    #[arg(long)]
    pub strict: bool,

    /// Log overlapping whisker regions while building the tree.
    #[arg(long, env = "REMY_DIAGNOSE")]
    pub diagnose: bool,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<LevelFilter>,
}

impl RunnerArgs {
    pub fn load_mode(&self) -> LoadMode {
        if self.strict {
            LoadMode::Strict
        } else {
            LoadMode::SkipConflicts
        }
    }

    pub fn insert_mode(&self) -> InsertMode {
        insert_mode(self.diagnose)
    }

    pub fn link_config(&self) -> SimLinkConfig {
        SimLinkConfig {
            link_ppt: self.link_ppt,
            rtt: millis(self.rtt),
            loss: self.loss,
            ..Default::default()
        }
    }

    pub fn gang_config(&self) -> GangConfig {
        GangConfig {
            num_senders: self.num_senders,
            mean_on: millis(self.mean_on),
            mean_off: millis(self.mean_off),
            ..Default::default()
        }
    }

    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }
}

/// Arguments of `remy`: expand a configuration grid into a rule table.
#[derive(clap::Parser, Debug, Clone)]
#[command(name = "remy", version, about)]
pub struct GenerateArgs {
    /// TOML file describing the configuration range and rule grid.
    #[arg(long, value_name = "PATH", env = "REMY_CONFIG")]
    pub config: PathBuf,

    /// Where to write the rule table.
    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,

    /// Log overlapping whisker regions while validating the grid.
    #[arg(long, env = "REMY_DIAGNOSE")]
    pub diagnose: bool,

    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<LevelFilter>,
}

impl GenerateArgs {
    pub fn insert_mode(&self) -> InsertMode {
        insert_mode(self.diagnose)
    }
}

fn insert_mode(diagnose: bool) -> InsertMode {
    if diagnose {
        InsertMode::Diagnostic
    } else {
        InsertMode::Strict
    }
}

/// Negative and NaN values become zero.
fn millis(ms: f64) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((ms * 1_000_000.0).round() as u64)
}

/// Installs the global subscriber the first time it is called; later calls
/// are no-ops.
pub fn set_logger(level: Option<LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        use std::sync::atomic::{AtomicBool, Ordering};

        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(false, true, Ordering::Release, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracing::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    let _ = level;
}
