//! Configuration updates delivered while the tool is running.
//!
//! Text arriving on the named pipe is parsed with the same option grammar as
//! the command line and turned into typed [`Command`]s.

use crate::cli::AcqArgs;
use crate::conf::{Conf, ConfType};
use crate::cycle::Coordinator;
use clap::Parser;
use log::{error, info, warn};
use std::{
    ffi::CString,
    fs::File,
    io::{self, BufRead, BufReader},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ReconfigureTrigger(Conf),
    ReconfigureAcquisition(Conf),
    ReconfigureChannel(Conf),
}

impl Command {
    pub fn from_conf(conf: Conf) -> Self {
        match conf.kind {
            ConfType::Trigger => Command::ReconfigureTrigger(conf),
            ConfType::Acquisition => Command::ReconfigureAcquisition(conf),
            ConfType::Channel => Command::ReconfigureChannel(conf),
        }
    }

    pub fn conf(&self) -> &Conf {
        match self {
            Command::ReconfigureTrigger(conf)
            | Command::ReconfigureAcquisition(conf)
            | Command::ReconfigureChannel(conf) => conf,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "adcfifo", no_binary_name = true)]
struct PipeArgs {
    #[command(flatten)]
    acq: AcqArgs,
}

/// Parse one line of options, e.g. `-n 3 --threshold 200`.
pub fn parse_line(line: &str) -> Result<Vec<Command>, clap::Error> {
    let args = PipeArgs::try_parse_from(line.split_whitespace())?;
    Ok(args
        .acq
        .updates()
        .into_iter()
        .map(Command::from_conf)
        .collect())
}

/// Create the named pipe unless something already exists at `path`.
pub fn ensure_fifo(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn handle_line(line: &str, coord: &Coordinator) {
    if line.trim().is_empty() {
        return;
    }
    match parse_line(line) {
        Ok(commands) if commands.is_empty() => warn!("no configuration in {line:?}"),
        Ok(commands) => {
            info!("new configuration requested: {line:?}");
            coord.post(commands);
        }
        Err(e) => warn!("ignoring {line:?}: {e}"),
    }
}

fn listen(path: &Path, coord: &Coordinator) -> io::Result<()> {
    loop {
        // blocks until a writer shows up
        let reader = BufReader::new(File::open(path)?);
        for line in reader.lines() {
            handle_line(&line?, coord);
        }
        info!("writer closed {}, reopening", path.display());
    }
}

/// Start the thread listening on the named pipe. It runs until the process
/// exits; when the pipe cannot be opened or read it warns, recreates the
/// pipe if needed and tries again after `retry`.
pub fn spawn_fifo_listener(
    path: PathBuf,
    coord: Arc<Coordinator>,
    retry: Duration,
) -> io::Result<JoinHandle<()>> {
    ensure_fifo(&path)?;
    thread::Builder::new()
        .name("fifo-listener".into())
        .spawn(move || loop {
            if let Err(e) = listen(&path, &coord) {
                warn!("{}: {e}, retrying in {retry:?}", path.display());
            }
            thread::sleep(retry);
            if let Err(e) = ensure_fifo(&path) {
                error!("cannot create {}: {e}", path.display());
            }
        })
}
