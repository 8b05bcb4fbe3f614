use crate::conf::{Conf, ConfField, ConfType};
use crate::output::OutputMode;
use clap::{Args, Parser};
use std::{path::PathBuf, time::Duration};

/// Input range of a channel, as selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputRange {
    Range100mV,
    Range1V,
    Range10V,
    Open,
    /// Any other value goes to the driver untouched.
    Raw(u32),
}

impl InputRange {
    pub fn from_arg(value: i64) -> Self {
        match value {
            100 => Self::Range100mV,
            1 => Self::Range1V,
            10 => Self::Range10V,
            0 => Self::Open,
            other => Self::Raw(other as u32),
        }
    }

    /// Value of the `vref` attribute.
    pub fn code(self) -> u32 {
        match self {
            Self::Range100mV => 0x23,
            Self::Range1V => 0x11,
            Self::Range10V => 0x45,
            Self::Open => 0x00,
            Self::Raw(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0x23 => Self::Range100mV,
            0x11 => Self::Range1V,
            0x45 => Self::Range10V,
            0x00 => Self::Open,
            other => Self::Raw(other),
        }
    }

    /// Volts per ADC count, when the range is known.
    pub fn bit_scale(self) -> Option<f64> {
        let full_scale = match self {
            Self::Range100mV => 0.05,
            Self::Range1V => 0.5,
            Self::Range10V => 5.0,
            Self::Open | Self::Raw(_) => return None,
        };
        Some(full_scale / f64::from(1u32 << 15))
    }
}

fn parse_range(s: &str) -> Result<InputRange, String> {
    s.trim()
        .parse::<i64>()
        .map(InputRange::from_arg)
        .map_err(|e| format!("invalid input range {s:?}: {e}"))
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid LUN {s:?}: {e}"))
}

/// Hardware configuration options, shared by the command line and the
/// configuration pipe.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct AcqArgs {
    /// Number of pre-trigger samples
    #[arg(short = 'b', long = "before", conflicts_with = "pre")]
    pub before: Option<u32>,
    /// Same as --before
    #[arg(short = 'p', long = "pre")]
    pub pre: Option<u32>,
    /// Number of post-trigger samples
    #[arg(short = 'a', long = "after", conflicts_with = "post")]
    pub after: Option<u32>,
    /// Same as --after
    #[arg(short = 'P', long = "post")]
    pub post: Option<u32>,
    /// Number of trigger shots
    #[arg(short = 'n', long)]
    pub nshots: Option<u32>,
    /// Delay in samples after the trigger
    #[arg(short = 'd', long)]
    pub delay: Option<u32>,
    /// Keep one sample every <N>
    #[arg(short = 'u', long = "under-sample", conflicts_with = "decimation")]
    pub under_sample: Option<u32>,
    /// Same as --under-sample
    #[arg(short = 'D', long)]
    pub decimation: Option<u32>,
    /// Internal trigger threshold
    #[arg(short = 't', long, allow_negative_numbers = true)]
    pub threshold: Option<i32>,
    /// Channel used as internal trigger (1..4)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..=4))]
    pub channel: Option<u32>,
    /// Channel input range: 100 (100mV), 1 (1V), 10 (10V)
    #[arg(short = 'r', long = "input-range", value_parser = parse_range)]
    pub input_range: Option<InputRange>,
    /// Internal trigger on the falling edge
    #[arg(long)]
    pub negative_edge: bool,
}

impl AcqArgs {
    pub fn pre_samples(&self) -> Option<u32> {
        self.before.or(self.pre)
    }

    pub fn post_samples(&self) -> Option<u32> {
        self.after.or(self.post)
    }

    pub fn decimation(&self) -> Option<u32> {
        self.under_sample.or(self.decimation)
    }

    /// Trigger fields given explicitly. `--negative-edge` selects the
    /// falling edge; without it the polarity is left as it is.
    pub fn trigger_conf(&self) -> Conf {
        let mut conf = Conf::new(ConfType::Trigger);
        if let Some(delay) = self.delay {
            conf.set(ConfField::TrgDelay, delay);
        }
        if let Some(threshold) = self.threshold {
            conf.set(ConfField::TrgThreshold, threshold as u32);
        }
        if let Some(channel) = self.channel {
            // a trigger channel means internal trigger
            conf.set(ConfField::TrgSource, 0);
            conf.set(ConfField::TrgSourceChan, channel - 1);
        }
        if self.negative_edge {
            conf.set(ConfField::TrgPolarity, 1);
        }
        conf
    }

    pub fn acquisition_conf(&self) -> Conf {
        let mut conf = Conf::new(ConfType::Acquisition);
        if let Some(pre) = self.pre_samples() {
            conf.set(ConfField::AcqPreSamp, pre);
        }
        if let Some(post) = self.post_samples() {
            conf.set(ConfField::AcqPostSamp, post);
        }
        if let Some(nshots) = self.nshots {
            conf.set(ConfField::AcqNShots, nshots);
        }
        if let Some(decimation) = self.decimation() {
            conf.set(ConfField::AcqDecimation, decimation);
        }
        conf
    }

    pub fn channel_conf(&self) -> Conf {
        let mut conf = Conf::routed(ConfType::Channel, 0);
        if let Some(range) = self.input_range {
            conf.set(ConfField::ChnRange, range.code());
        }
        conf
    }

    /// Overlay the options on the configuration read from the board at
    /// startup: external trigger and 1V range unless told otherwise.
    pub fn apply_startup(&self, cfg: &mut ConfigSet) {
        cfg.trigger.set(ConfField::TrgSource, 1);
        cfg.trigger.set(ConfField::TrgPolarity, u32::from(self.negative_edge));
        cfg.channel.set(ConfField::ChnRange, InputRange::Range1V.code());

        cfg.trigger.merge(&self.trigger_conf());
        cfg.acquisition.merge(&self.acquisition_conf());
        cfg.channel.merge(&self.channel_conf());
    }

    /// Configuration records touched by these options, for a live update.
    pub fn updates(&self) -> Vec<Conf> {
        [
            self.trigger_conf(),
            self.acquisition_conf(),
            self.channel_conf(),
        ]
        .into_iter()
        .filter(|conf| !conf.is_empty())
        .collect()
    }
}

/// The three records driven by the tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigSet {
    pub trigger: Conf,
    pub acquisition: Conf,
    pub channel: Conf,
}

impl Default for ConfigSet {
    fn default() -> Self {
        Self {
            trigger: Conf::new(ConfType::Trigger),
            acquisition: Conf::new(ConfType::Acquisition),
            channel: Conf::routed(ConfType::Channel, 0),
        }
    }
}

impl ConfigSet {
    /// Records asking for every field the tool cares about.
    pub fn retrieve_request() -> Self {
        let mut cfg = Self::default();
        for field in [
            ConfField::TrgSource,
            ConfField::TrgSourceChan,
            ConfField::TrgThreshold,
            ConfField::TrgPolarity,
            ConfField::TrgDelay,
        ] {
            cfg.trigger.request(field);
        }
        for field in [
            ConfField::AcqNShots,
            ConfField::AcqPostSamp,
            ConfField::AcqPreSamp,
            ConfField::AcqDecimation,
        ] {
            cfg.acquisition.request(field);
        }
        for field in [
            ConfField::ChnRange,
            ConfField::ChnTermination,
            ConfField::ChnOffset,
        ] {
            cfg.channel.request(field);
        }
        cfg
    }

    pub fn records(&self) -> [&Conf; 3] {
        [&self.trigger, &self.acquisition, &self.channel]
    }

    pub fn records_mut(&mut self) -> [&mut Conf; 3] {
        [&mut self.trigger, &mut self.acquisition, &mut self.channel]
    }

    pub fn merge(&mut self, update: &Conf) {
        match update.kind {
            ConfType::Trigger => self.trigger.merge(update),
            ConfType::Acquisition => self.acquisition.merge(update),
            ConfType::Channel => self.channel.merge(update),
        }
    }

    /// Samples per channel in one shot.
    pub fn samples_per_shot(&self) -> usize {
        self.acquisition.value(ConfField::AcqPreSamp) as usize
            + self.acquisition.value(ConfField::AcqPostSamp) as usize
    }

    pub fn nshots(&self) -> u32 {
        self.acquisition.value(ConfField::AcqNShots)
    }

    pub fn pre_samples(&self) -> u32 {
        self.acquisition.value(ConfField::AcqPreSamp)
    }

    pub fn input_range(&self) -> InputRange {
        InputRange::from_code(self.channel.value(ConfField::ChnRange))
    }
}

/// fald-acq: acquire waveforms from an FMC ADC 100M 14b 4cha.
#[derive(Parser, Debug, Clone)]
#[command(name = "fald-acq", version, about)]
pub struct Cli {
    /// LUN identifier, hexadecimal (e.g. "0")
    #[arg(value_parser = parse_hex)]
    pub lun: u32,

    #[command(flatten)]
    pub acq: AcqArgs,

    /// Timeout for acquisition, in milliseconds
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,

    /// Append every shot to <FILE>
    #[arg(short = 'B', long = "binary", conflicts_with_all = ["multi_binary", "dont_read"])]
    pub binary: Option<PathBuf>,

    /// Save two files per shot: <FILE>.000.ctrl, <FILE>.000.data, ...
    #[arg(short = 'M', long = "multi-binary", conflicts_with = "dont_read")]
    pub multi_binary: Option<PathBuf>,

    /// Configure only, do not read data
    #[arg(short = 'N', long = "dont-read")]
    pub dont_read: bool,

    /// Number of acquisition loops before exiting
    #[arg(short = 'l', long = "loop", default_value_t = 1)]
    pub loops: u32,

    /// How many samples to display: >0 from head, <0 from tail
    #[arg(short = 's', long = "show-data", allow_negative_numbers = true)]
    pub show_data: Option<i64>,

    /// Plot the given channel (1..4) with gnuplot after the last loop
    #[arg(short = 'g', long = "graph")]
    pub graph: Option<u32>,

    /// Let gnuplot use the X11 terminal
    #[arg(short = 'X', long = "x11")]
    pub x11: bool,

    /// Tool settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run against a simulated board instead of the hardware
    #[arg(long)]
    pub simulate: bool,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if let Some(path) = &self.binary {
            OutputMode::SingleFile(path.clone())
        } else if let Some(path) = &self.multi_binary {
            OutputMode::MultiFile(path.clone())
        } else if self.dont_read {
            OutputMode::ConfigOnly
        } else {
            OutputMode::Preview(self.show_data)
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}
