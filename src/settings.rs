use crate::device::DeviceLocation;
use confique::Config;
use std::{path::PathBuf, time::Duration};

/// Settings of the acquisition tool that are not worth a command-line flag.
#[derive(Config, Debug, Clone)]
pub struct Settings {
    #[config(nested)]
    pub paths: PathSettings,
    #[config(nested)]
    pub run: RunSettings,
}

#[derive(Config, Debug, Clone)]
pub struct PathSettings {
    #[config(default = "/sys/bus/zio/devices", env = "FMCADC_SYS_ROOT")]
    pub sys_root: PathBuf,
    #[config(default = "/dev", env = "FMCADC_DEV_ROOT")]
    pub dev_root: PathBuf,
    /// Named pipe for configuration updates while running.
    #[config(default = "/tmp/adcfifo", env = "FMCADC_FIFO")]
    pub fifo: PathBuf,
    /// Where plot data files are written.
    #[config(default = "/tmp", env = "FMCADC_PLOT_DIR")]
    pub plot_dir: PathBuf,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    /// Longest single wait of the poll thread, in milliseconds.
    #[config(default = 500)]
    pub poll_slice_ms: u64,
    /// Pause before reopening the named pipe after an error, in milliseconds.
    #[config(default = 1000)]
    pub fifo_retry_ms: u64,
    #[config(default = "info", env = "FMCADC_LOG")]
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Settings {
    /// Load from environment and an optional TOML file, environment first.
    pub fn load(file: Option<&std::path::Path>) -> Result<Self, confique::Error> {
        let mut builder = Settings::builder().env();
        if let Some(file) = file {
            builder = builder.file(file);
        }
        builder.load()
    }

    pub fn location(&self) -> DeviceLocation {
        DeviceLocation {
            sys_root: self.paths.sys_root.clone(),
            dev_root: self.paths.dev_root.clone(),
        }
    }

    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.run.poll_slice_ms.max(1))
    }

    pub fn fifo_retry(&self) -> Duration {
        Duration::from_millis(self.run.fifo_retry_ms.max(1))
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.run.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fald.toml");
        std::fs::write(
            &path,
            "[paths]\nfifo = \"/run/adc.fifo\"\n\n[run]\npoll_slice_ms = 20\nlog_level = \"debug\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.paths.fifo, PathBuf::from("/run/adc.fifo"));
        assert_eq!(settings.poll_slice(), Duration::from_millis(20));
        assert_eq!(settings.log_level(), log::LevelFilter::Debug);
        assert_eq!(settings.location().dev_root, PathBuf::from("/dev"));
        assert!(settings.run.log_file.is_none());
        assert_eq!(settings.fifo_retry(), Duration::from_secs(1));
    }
}
