//! The acquisition cycle of `fald-acq`.
//!
//! The main thread starts the board and hands the wait for trigger completion
//! to a poll-waiter thread. The waiter reports back through the
//! [`Coordinator`], as does the fifo listener when a configuration update
//! arrives. Updates are only applied at the top of the main loop, never while
//! a shot is being read.

use crate::buffer::Buffer;
use crate::cli::ConfigSet;
use crate::command::Command;
use crate::device::Device;
use crate::output::{Shot, ShotSink};
use crate::utils::Counter;
use crate::zio::Timestamp;
use crate::Error;
use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Why the main loop was woken up.
#[derive(Debug, Clone, PartialEq)]
pub enum Wakeup {
    /// The board completed an acquisition.
    Acquire,
    /// Configuration updates are queued.
    Reconfigure,
    /// The poll waiter hit an unrecoverable error.
    Failed(String),
}

#[derive(Debug, Default)]
struct CycleState {
    acquire: bool,
    reconfigure: bool,
    poll_requested: bool,
    /// Bumped on every start; a wait for an older start is stale.
    generation: u64,
    waiter_ready: bool,
    failed: Option<String>,
}

/// Flags shared by the main loop, the poll waiter and the fifo listener.
pub struct Coordinator {
    state: Mutex<CycleState>,
    ready_to_poll: Condvar,
    ready_to_read_or_cfg: Condvar,
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            state: Mutex::new(CycleState::default()),
            ready_to_poll: Condvar::new(),
            ready_to_read_or_cfg: Condvar::new(),
            tx,
            rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue configuration updates and wake the main loop.
    pub fn post(&self, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        for cmd in commands {
            // the receiver lives as long as self
            let _ = self.tx.send(cmd);
        }
        let mut state = self.lock();
        state.reconfigure = true;
        self.ready_to_read_or_cfg.notify_all();
    }

    /// Drain the queued updates, oldest first.
    pub fn take_commands(&self) -> Vec<Command> {
        self.rx.try_iter().collect()
    }

    /// Ask the waiter to wait for the acquisition just started. Returns the
    /// generation of that start.
    pub fn request_poll(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.poll_requested = true;
        // completion of an earlier start no longer counts
        state.acquire = false;
        self.ready_to_poll.notify_all();
        state.generation
    }

    /// Block the waiter until a poll is requested.
    pub fn wait_poll_request(&self) -> u64 {
        let mut state = self.lock();
        if !state.waiter_ready {
            state.waiter_ready = true;
            self.ready_to_read_or_cfg.notify_all();
        }
        let mut state = self
            .ready_to_poll
            .wait_while(state, |s| !s.poll_requested)
            .unwrap_or_else(|e| e.into_inner());
        state.poll_requested = false;
        state.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Report a completed acquisition, unless a newer start superseded it.
    pub fn signal_acquire(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.acquire = true;
            self.ready_to_read_or_cfg.notify_all();
        } else {
            debug!("dropping completion of start #{generation}");
        }
    }

    pub fn fail(&self, reason: String) {
        let mut state = self.lock();
        state.failed = Some(reason);
        self.ready_to_read_or_cfg.notify_all();
    }

    /// Block until the poll waiter is parked and listening.
    pub fn wait_waiter_ready(&self) {
        let _state = self
            .ready_to_read_or_cfg
            .wait_while(self.lock(), |s| !s.waiter_ready && s.failed.is_none())
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Block the main loop until there is something to do. Reconfiguration
    /// wins over a pending acquisition.
    pub fn wait_event(&self) -> Wakeup {
        let mut state = self
            .ready_to_read_or_cfg
            .wait_while(self.lock(), |s| {
                !s.acquire && !s.reconfigure && s.failed.is_none()
            })
            .unwrap_or_else(|e| e.into_inner());
        if let Some(reason) = state.failed.take() {
            Wakeup::Failed(reason)
        } else if state.reconfigure {
            state.reconfigure = false;
            state.acquire = false;
            Wakeup::Reconfigure
        } else {
            state.acquire = false;
            Wakeup::Acquire
        }
    }
}

fn wait_for_completion(
    dev: &Device,
    coord: &Coordinator,
    generation: u64,
    slice: Duration,
) -> bool {
    while coord.is_current(generation) {
        match dev.poll(Some(slice)) {
            Ok(()) => {
                coord.signal_acquire(generation);
                return true;
            }
            Err(e) if e.is_retryable() => continue,
            Err(e) if e.is_disabled() => {
                debug!("poll interrupted: {e}");
                thread::sleep(slice);
            }
            Err(e) => {
                coord.fail(format!("poll: {e}"));
                return false;
            }
        }
    }
    debug!("start #{generation} superseded");
    true
}

/// Start the thread that waits for trigger completion. It runs until the
/// process exits or polling fails.
pub fn spawn_poll_waiter(
    dev: Arc<Device>,
    coord: Arc<Coordinator>,
    slice: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("poll-waiter".into())
        .spawn(move || loop {
            let generation = coord.wait_poll_request();
            if !wait_for_completion(&dev, &coord, generation, slice) {
                break;
            }
        })
}

/// Apply every record of `cfg`. Records with nothing to write are skipped.
pub fn apply_all(dev: &Device, cfg: &ConfigSet) -> crate::Result<()> {
    for conf in cfg.records() {
        match dev.apply_config(conf) {
            Err(e) if e.is_no_mask() => debug!("nothing to apply for {}", conf.kind.name()),
            other => other?,
        }
    }
    Ok(())
}

fn start(dev: &Device, coord: &Coordinator, flush: bool) -> Result<()> {
    dev.start(flush, Some(Duration::ZERO))
        .context("cannot start acquisition")?;
    let generation = coord.request_poll();
    debug!("acquisition started (#{generation})");
    Ok(())
}

/// How a pass over the shots of one acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotOutcome {
    Completed(u32),
    /// The trigger was disabled while reading.
    Disabled { done: u32 },
    /// No block arrived within the read timeout.
    TimedOut { done: u32 },
}

impl ShotOutcome {
    pub fn done(self) -> u32 {
        match self {
            ShotOutcome::Completed(done)
            | ShotOutcome::Disabled { done }
            | ShotOutcome::TimedOut { done } => done,
        }
    }
}

fn format_stamp(ts: &Timestamp) -> String {
    let secs = i64::try_from(ts.secs).unwrap_or(i64::MAX);
    match OffsetDateTime::from_unix_timestamp(secs).map(|t| t.format(&Rfc3339)) {
        Ok(Ok(date)) => format!("{date} +{} ticks", ts.ticks),
        _ => format!("{}s +{} ticks", ts.secs, ts.ticks),
    }
}

/// Read `nshots` blocks into `buf`, handing each to `sink`.
pub fn run_shots(
    dev: &Device,
    buf: &mut Buffer,
    nshots: u32,
    pre_samples: u32,
    timeout: Option<Duration>,
    sink: &mut dyn ShotSink,
    counter: &mut Counter,
) -> Result<ShotOutcome> {
    for i in 0..nshots {
        match dev.fill_buffer(buf, timeout) {
            Ok(()) => {}
            Err(e) if e.is_disabled() => {
                info!("acquisition disabled after {i} of {nshots} shots");
                return Ok(ShotOutcome::Disabled { done: i });
            }
            Err(Error::Again) => {
                warn!("timeout waiting for shot {}/{nshots}", i + 1);
                return Ok(ShotOutcome::TimedOut { done: i });
            }
            Err(e) => return Err(e).context("cannot read data"),
        }

        let shot = Shot {
            index: i,
            total: nshots,
            pre_samples,
            buf: &*buf,
        };
        counter.increment(shot.payload().len());
        if let Some(ctrl) = buf.metadata() {
            info!(
                "shot {}/{nshots}: {} samples, seq {}, {} ({:.2} MB/s)",
                i + 1,
                ctrl.nsamples,
                ctrl.seq_num,
                format_stamp(&ctrl.tstamp),
                counter.rate()
            );
        }
        sink.write_shot(&shot)?;
    }
    Ok(ShotOutcome::Completed(nshots))
}

#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Acquisitions to read before returning.
    pub loops: u32,
    /// Longest wait for a single shot.
    pub timeout: Option<Duration>,
}

/// Drive the board through `opts.loops` acquisitions.
///
/// The poll waiter must already be running on `coord`. Returns the buffer of
/// the last acquisition, if any data was read.
pub fn run(
    dev: &Device,
    coord: &Coordinator,
    cfg: &mut ConfigSet,
    sink: &mut dyn ShotSink,
    opts: &CycleOptions,
) -> Result<Option<Buffer>> {
    coord.wait_waiter_ready();

    dev.stop().context("cannot stop acquisition")?;
    apply_all(dev, cfg).context("cannot configure board")?;
    if !sink.wants_data() {
        info!("board configured, not reading data");
        return Ok(None);
    }

    let mut counter = Counter::new();
    let mut buf = Some(dev.request_buffer(cfg.samples_per_shot()));
    start(dev, coord, true)?;

    let mut remaining = opts.loops;
    while remaining > 0 {
        match coord.wait_event() {
            Wakeup::Failed(reason) => bail!(reason),
            Wakeup::Reconfigure => {
                dev.stop().context("cannot stop acquisition")?;
                if let Some(old) = buf.take() {
                    dev.release_buffer(old);
                }
                for cmd in coord.take_commands() {
                    debug!("applying {cmd:?}");
                    cfg.merge(cmd.conf());
                }
                apply_all(dev, cfg).context("cannot configure board")?;
                start(dev, coord, true)?;
            }
            Wakeup::Acquire => {
                let buf = buf.get_or_insert_with(|| dev.request_buffer(cfg.samples_per_shot()));
                let outcome = run_shots(
                    dev,
                    buf,
                    cfg.nshots(),
                    cfg.pre_samples(),
                    opts.timeout,
                    sink,
                    &mut counter,
                )?;
                sink.end_loop()?;
                remaining -= 1;
                info!(
                    "{} shots read, {} loops left ({:.2} MB/s)",
                    outcome.done(),
                    remaining,
                    counter.average_rate()
                );
                if remaining > 0 {
                    start(dev, coord, false)?;
                }
            }
        }
    }

    dev.stop().context("cannot stop acquisition")?;
    info!(
        "{} shots, {} bytes in total",
        counter.n_shots, counter.total_size
    );
    Ok(buf)
}
