//! An in-memory stand-in for the ZIO driver.
//!
//! The simulated board keeps its attributes in a map and answers a start
//! command by queueing `nshots` blocks on its control and data streams, much
//! like the real driver does once the trigger fires.

use crate::board::FMCADC_100MS_4CH_14BIT;
use crate::device::Device;
use crate::stream::DeviceStream;
use crate::sysfs::AttributeStore;
use crate::zio::{Timestamp, ZioControl};
use rand::Rng;
use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[derive(Default)]
struct Queue {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// A byte stream fed by the simulator and drained through [`DeviceStream`].
#[derive(Default)]
pub struct SimStream {
    queue: Mutex<Queue>,
    cond: Condvar,
}

impl SimStream {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, bytes: &[u8]) {
        self.lock().bytes.extend(bytes);
        self.cond.notify_all();
    }

    /// End the stream: blocked and future readers see end of file.
    pub fn close(&self) {
        let mut queue = self.lock();
        queue.bytes.clear();
        queue.closed = true;
        self.cond.notify_all();
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn pending(&self) -> usize {
        self.lock().bytes.len()
    }
}

impl DeviceStream for Arc<SimStream> {
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let queue = self.lock();
        let ready = |q: &mut Queue| q.bytes.is_empty() && !q.closed;
        let queue = match timeout {
            None => self
                .cond
                .wait_while(queue, ready)
                .unwrap_or_else(|e| e.into_inner()),
            Some(t) => {
                self.cond
                    .wait_timeout_while(queue, t, ready)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
        };
        Ok(!queue.bytes.is_empty() || queue.closed)
    }

    fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self
            .cond
            .wait_while(self.lock(), |q| q.bytes.is_empty() && !q.closed)
            .unwrap_or_else(|e| e.into_inner());
        let n = buf.len().min(queue.bytes.len());
        for (dst, src) in buf.iter_mut().zip(queue.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

struct Shared {
    dev_id: u32,
    attrs: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<u32>>,
    ctrl: Arc<SimStream>,
    data: Arc<SimStream>,
    seq: AtomicU32,
    auto_trigger: AtomicBool,
}

impl Shared {
    fn attr_u32(&self, name: &str) -> u32 {
        self.attrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn set(&self, name: &str, value: &str) {
        self.attrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.to_string());
    }

    fn on_command(&self, cmd: u32) {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd);
        match cmd {
            1 => {
                self.set("cset0/trigger/enable", "1");
                self.ctrl.reopen();
                self.data.reopen();
                if self.auto_trigger.load(Ordering::SeqCst) {
                    for _ in 0..self.attr_u32("cset0/trigger/nshots").max(1) {
                        self.fire();
                    }
                }
            }
            2 => log::debug!("simulated fsm stopped"),
            other => log::warn!("simulated fsm: unknown command {other}"),
        }
    }

    fn fire(&self) {
        let nchan = FMCADC_100MS_4CH_14BIT.nchan as usize;
        let pre = self.attr_u32("cset0/trigger/pre-samples") as usize;
        let post = self.attr_u32("cset0/trigger/post-samples") as usize;
        let n = pre + post;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let ctrl = ZioControl {
            major_version: 1,
            minor_version: 0,
            seq_num: self.seq.fetch_add(1, Ordering::SeqCst),
            nsamples: (n * nchan) as u32,
            ssize: 2,
            nbits: 16,
            dev_id: self.dev_id,
            cset: 0,
            chan: 0,
            devname: FMCADC_100MS_4CH_14BIT.devname.to_string(),
            tstamp: Timestamp {
                secs: now.as_secs(),
                // the board counts ticks of 8 ns
                ticks: u64::from(now.subsec_nanos()) / 8,
                bins: 0,
            },
            triggername: "adc-trg".to_string(),
        };

        let mut rng = rand::rng();
        let mut payload = Vec::with_capacity(n * nchan * 2);
        for i in 0..n {
            let phase = i as f64 / n.max(1) as f64 * std::f64::consts::TAU;
            for ch in 0..nchan {
                let amplitude = 4000.0 * (ch + 1) as f64;
                let sample = (phase.sin() * amplitude) as i16 + rng.random_range(-8..=8);
                payload.extend_from_slice(&sample.to_ne_bytes());
            }
        }

        // data first so a reader woken by the control block never waits
        self.data.push(&payload);
        self.ctrl.push(&ctrl.encode());
    }
}

struct SimStore(Arc<Shared>);

impl AttributeStore for SimStore {
    fn read(&self, name: &str) -> io::Result<String> {
        self.0
            .attrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn write(&self, name: &str, value: &str) -> io::Result<()> {
        let parsed: Option<u32> = value.trim().parse().ok();
        self.0.set(name, value);
        if name == "cset0/fsm-command" {
            let cmd = parsed.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("bad command {value:?}"))
            })?;
            self.0.on_command(cmd);
        }
        Ok(())
    }
}

const DEFAULT_ATTRS: &[(&str, &str)] = &[
    ("cset0/fsm-command", "2"),
    ("cset0/trigger/enable", "1"),
    ("cset0/trigger/external", "1"),
    ("cset0/trigger/int-channel", "0"),
    ("cset0/trigger/int-threshold", "0"),
    ("cset0/trigger/polarity", "0"),
    ("cset0/trigger/delay", "0"),
    ("cset0/trigger/nshots", "1"),
    ("cset0/trigger/pre-samples", "0"),
    ("cset0/trigger/post-samples", "16"),
    ("cset0/sample-decimation", "1"),
];

/// A simulated FMC ADC 100M 14b 4cha.
#[derive(Clone)]
pub struct SimulatedBoard {
    shared: Arc<Shared>,
}

impl SimulatedBoard {
    pub fn new(dev_id: u32) -> Self {
        let mut attrs: HashMap<String, String> = DEFAULT_ATTRS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for ch in 0..FMCADC_100MS_4CH_14BIT.nchan {
            attrs.insert(format!("cset0/ch{ch}-vref"), "17".into());
            attrs.insert(format!("cset0/ch{ch}-50ohm-term"), "0".into());
            attrs.insert(format!("cset0/ch{ch}-offset"), "0".into());
        }
        Self {
            shared: Arc::new(Shared {
                dev_id,
                attrs: Mutex::new(attrs),
                commands: Mutex::new(Vec::new()),
                ctrl: Arc::new(SimStream::default()),
                data: Arc::new(SimStream::default()),
                seq: AtomicU32::new(0),
                auto_trigger: AtomicBool::new(true),
            }),
        }
    }

    /// A device handle wired to this board.
    pub fn device(&self) -> Device {
        Device::from_parts(
            &FMCADC_100MS_4CH_14BIT,
            self.shared.dev_id,
            Box::new(SimStore(Arc::clone(&self.shared))),
            Box::new(Arc::clone(&self.shared.ctrl)),
            Box::new(Arc::clone(&self.shared.data)),
        )
    }

    /// When set (the default), a start command immediately produces `nshots`
    /// blocks. Otherwise blocks only come from [`SimulatedBoard::fire`].
    pub fn set_auto_trigger(&self, on: bool) {
        self.shared.auto_trigger.store(on, Ordering::SeqCst);
    }

    /// Emit one block as if the trigger fired.
    pub fn fire(&self) {
        self.shared.fire();
    }

    /// Disable the trigger, aborting pending and blocked reads.
    pub fn disable_trigger(&self) {
        self.shared.set("cset0/trigger/enable", "0");
        self.shared.ctrl.close();
        self.shared.data.close();
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.shared
            .attrs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn set_attr(&self, name: &str, value: &str) {
        self.shared.set(name, value);
    }

    /// Every command written to `cset0/fsm-command`, oldest first.
    pub fn commands(&self) -> Vec<u32> {
        self.shared
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bytes waiting on the control stream.
    pub fn pending_control(&self) -> usize {
        self.shared.ctrl.pending()
    }
}
