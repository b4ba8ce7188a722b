use clap::{Parser, Subcommand, ValueEnum};
use inferno_hal::RtdModel;

/// Maximum number of meat probes on the controller.
pub const MAX_PROBES: usize = 4;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Bridge the local controller to the cloud until interrupted
    Run {
        /// Use the in-memory loopback endpoint instead of a cloud hub
        #[arg(long, env = "INFERNO_LOOPBACK")]
        loopback: bool,

        /// Serve controller data from simulated sensors instead of the HTTP API
        #[arg(long)]
        simulate: bool,
    },

    /// Run the sensor pipeline against simulated resistances and print
    /// the display rendering once per second
    Probe {
        /// Grill channel resistance in ohms; unplugged when omitted
        #[arg(long = "grill-ohms", value_name = "ohms")]
        grill_ohms: Option<f64>,

        /// Meat probe resistance in ohms, probe1 first; repeat up to four times
        #[arg(long = "probe-ohms", value_name = "ohms", num_args = 1..=MAX_PROBES)]
        probe_ohms: Vec<f64>,

        /// Resistance-to-temperature model
        #[arg(long, value_enum, default_value_t = ModelArg::Steinhart)]
        model: ModelArg,

        /// Stop after this many seconds; runs until Ctrl-C when omitted
        #[arg(long, value_name = "secs")]
        seconds: Option<u64>,
    },

    /// Poll the controller status and print CSV rows
    Templog {
        /// Controller API base URL; defaults to the configured one
        #[arg(long, env = "INFERNO_CONTROLLER_URL", value_name = "url")]
        url: Option<String>,

        /// Seconds between polls
        #[arg(long = "interval-secs", value_name = "secs", default_value_t = 5)]
        interval_secs: u64,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModelArg {
    /// Steinhart–Hart fit of the stock smoker probes
    Steinhart,
    /// Platinum PT1000 element
    Pt1000,
}

impl From<ModelArg> for RtdModel {
    fn from(model: ModelArg) -> Self {
        match model {
            ModelArg::Steinhart => RtdModel::default(),
            ModelArg::Pt1000 => RtdModel::PT1000,
        }
    }
}
