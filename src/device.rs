use crate::board::{self, BoardType};
use crate::buffer::Buffer;
use crate::conf::{Conf, ConfField, ConfType};
use crate::error::{Error, ErrorCode, Result};
use crate::stream::{read_full, CharDevice, DeviceStream};
use crate::sysfs::{self, AttributeStore, SysfsStore};
use crate::zio::{ZioControl, ZIO_CONTROL_SIZE};
use log::{debug, info, log, warn, Level};
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

pub const ZIO_SYS_PATH: &str = "/sys/bus/zio/devices";
pub const DEV_PATH: &str = "/dev";

const FSM_COMMAND: &str = "cset0/fsm-command";
const FSM_CMD_START: u32 = 1;
const FSM_CMD_STOP: u32 = 2;
const TRIGGER_ENABLE: &str = "cset0/trigger/enable";

const ACQ_FREQ_HZ: u32 = 100_000_000;
const ACQ_N_BITS: u32 = 14;

/// Where the driver publishes its devices.
#[derive(Debug, Clone)]
pub struct DeviceLocation {
    pub sys_root: PathBuf,
    /// Device nodes live in `<dev_root>/zio` with recent udev rules, directly
    /// in `<dev_root>` otherwise.
    pub dev_root: PathBuf,
}

impl Default for DeviceLocation {
    fn default() -> Self {
        Self {
            sys_root: PathBuf::from(ZIO_SYS_PATH),
            dev_root: PathBuf::from(DEV_PATH),
        }
    }
}

impl DeviceLocation {
    fn node_dir(&self) -> PathBuf {
        let zio = self.dev_root.join("zio");
        if zio.is_dir() {
            zio
        } else {
            self.dev_root.clone()
        }
    }
}

/// Sysfs attribute backing a configuration field, `None` for read-only
/// fields answered by the library itself.
pub fn attribute_name(field: ConfField, route_to: u32) -> Option<String> {
    let name = match field {
        ConfField::TrgSource => "cset0/trigger/external".to_string(),
        ConfField::TrgSourceChan => "cset0/trigger/int-channel".to_string(),
        ConfField::TrgThreshold => "cset0/trigger/int-threshold".to_string(),
        ConfField::TrgPolarity => "cset0/trigger/polarity".to_string(),
        ConfField::TrgDelay => "cset0/trigger/delay".to_string(),
        ConfField::AcqNShots => "cset0/trigger/nshots".to_string(),
        ConfField::AcqPostSamp => "cset0/trigger/post-samples".to_string(),
        ConfField::AcqPreSamp => "cset0/trigger/pre-samples".to_string(),
        ConfField::AcqDecimation => "cset0/sample-decimation".to_string(),
        ConfField::AcqFreqHz | ConfField::AcqNBits => return None,
        ConfField::ChnRange => format!("cset0/ch{route_to}-vref"),
        ConfField::ChnTermination => format!("cset0/ch{route_to}-50ohm-term"),
        ConfField::ChnOffset => format!("cset0/ch{route_to}-offset"),
    };
    Some(name)
}

/// An open ADC: its attribute store and the control and data streams of
/// channel set 0.
pub struct Device {
    board: &'static BoardType,
    dev_id: u32,
    sysbase: PathBuf,
    devbase: PathBuf,
    attrs: Box<dyn AttributeStore>,
    ctrl: Box<dyn DeviceStream>,
    data: Box<dyn DeviceStream>,
    sample_size: usize,
    page_size: usize,
    verbose: bool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("board", &self.board.name)
            .field("dev_id", &format_args!("{:#06x}", self.dev_id))
            .field("sysbase", &self.sysbase)
            .field("devbase", &self.devbase)
            .finish()
    }
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

fn open_stream(path: PathBuf) -> Result<Box<dyn DeviceStream>> {
    match CharDevice::open(&path) {
        Ok(dev) => Ok(Box::new(dev)),
        Err(source) => Err(Error::Open { path, source }),
    }
}

impl Device {
    /// Open the ZIO device `dev_id` of the given board family.
    pub fn open(
        board: &'static BoardType,
        dev_id: u32,
        location: &DeviceLocation,
    ) -> Result<Self> {
        let name = board.device_name(dev_id);
        let sysbase = location.sys_root.join(&name);
        if !sysbase.exists() {
            return Err(Error::NoDevice(sysbase));
        }
        let devbase = location.node_dir().join(&name);

        // both streams are dropped, hence closed, if either open fails
        let ctrl = open_stream(suffixed(&devbase, "-0-i-ctrl"))?;
        let data = open_stream(suffixed(&devbase, "-0-i-data"))?;

        let mut dev = Self::from_parts(
            board,
            dev_id,
            Box::new(SysfsStore::new(&sysbase)),
            ctrl,
            data,
        );
        dev.sysbase = sysbase;
        dev.devbase = devbase;
        info!("opened {} ({})", name, board.name);
        Ok(dev)
    }

    pub fn open_by_name(name: &str, dev_id: u32, location: &DeviceLocation) -> Result<Self> {
        Self::open(board::find(name)?, dev_id, location)
    }

    pub fn open_by_lun(name: &str, lun: u32, location: &DeviceLocation) -> Result<Self> {
        let board = board::find(name)?;
        let dev_id = board::resolve_lun(board, &location.dev_root, lun);
        Self::open(board, dev_id, location)
    }

    /// Assemble a device from already opened parts.
    pub fn from_parts(
        board: &'static BoardType,
        dev_id: u32,
        attrs: Box<dyn AttributeStore>,
        ctrl: Box<dyn DeviceStream>,
        data: Box<dyn DeviceStream>,
    ) -> Self {
        Self {
            board,
            dev_id,
            sysbase: PathBuf::new(),
            devbase: PathBuf::new(),
            attrs,
            ctrl,
            data,
            // the sample size counts every channel of the set
            sample_size: board.nchan as usize * 2,
            page_size: page_size(),
            verbose: std::env::var_os("LIB_FMCADC_VERBOSE").is_some(),
        }
    }

    /// Release both streams. Consuming the handle rules out a second close.
    pub fn close(self) {
        info!("closing {}", self.board.device_name(self.dev_id));
    }

    pub fn board(&self) -> &'static BoardType {
        self.board
    }

    pub fn dev_id(&self) -> u32 {
        self.dev_id
    }

    pub fn driver_type(&self) -> &'static str {
        self.board.driver_type
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn sysbase(&self) -> &Path {
        &self.sysbase
    }

    pub fn devbase(&self) -> &Path {
        &self.devbase
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    fn level(&self) -> Level {
        if self.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    pub fn get_attr(&self, name: &str) -> Result<u32> {
        sysfs::get_u32(&*self.attrs, name)
    }

    pub fn set_attr(&self, name: &str, value: u32) -> Result<()> {
        log!(self.level(), "{}: {name} <- {value}", self.board.device_name(self.dev_id));
        sysfs::set_u32(&*self.attrs, name, value)
    }

    fn set_attr_signed(&self, name: &str, value: i32) -> Result<()> {
        log!(self.level(), "{}: {name} <- {value}", self.board.device_name(self.dev_id));
        sysfs::set_i32(&*self.attrs, name, value)
    }

    /// Issue the start command. A zero timeout returns right after the
    /// command, anything else waits like [`Device::poll`].
    pub fn start(&self, flush: bool, timeout: Option<Duration>) -> Result<()> {
        if flush {
            self.flush();
        }
        self.set_attr(FSM_COMMAND, FSM_CMD_START)?;
        if timeout == Some(Duration::ZERO) {
            return Ok(());
        }
        self.poll(timeout)
    }

    pub fn stop(&self) -> Result<()> {
        self.set_attr(FSM_COMMAND, FSM_CMD_STOP)
    }

    /// Wait for the control stream to signal a completed acquisition.
    ///
    /// `None` waits forever. An elapsed timeout is [`Error::Again`].
    pub fn poll(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.ctrl.wait_readable(timeout)? {
            return Err(Error::Again);
        }
        if !self.trigger_enabled() {
            return Err(ErrorCode::Disabled.into());
        }
        Ok(())
    }

    /// Whether the trigger is armed. An unreadable attribute counts as enabled.
    pub fn trigger_enabled(&self) -> bool {
        self.get_attr(TRIGGER_ENABLE).map(|v| v != 0).unwrap_or(true)
    }

    /// Drop blocks left over from a previous acquisition.
    fn flush(&self) {
        let mut dropped = 0;
        while let Ok(true) = self.ctrl.wait_readable(Some(Duration::ZERO)) {
            let mut raw = [0u8; ZIO_CONTROL_SIZE];
            if !matches!(read_full(&*self.ctrl, &mut raw), Ok(ZIO_CONTROL_SIZE)) {
                break;
            }
            let mut payload = vec![0u8; ZioControl::decode(&raw).payload_len()];
            if read_full(&*self.data, &mut payload).map_or(true, |n| n < payload.len()) {
                break;
            }
            dropped += 1;
        }
        if dropped > 0 {
            debug!("flushed {dropped} stale blocks");
        }
    }

    fn check_fields(&self, conf: &Conf) -> Result<()> {
        if conf.is_empty() {
            return Err(ErrorCode::NoMask.into());
        }
        if let Some(field) = conf.present().find(|f| !self.board.supports(conf.kind, *f)) {
            debug!("{:?} is not a {} field", field, conf.kind.name());
            return Err(ErrorCode::NoCapability.into());
        }
        if conf.kind == ConfType::Channel && conf.route_to >= self.board.nchan {
            return Err(ErrorCode::NoChannel.into());
        }
        Ok(())
    }

    /// Write every present field of `conf` to the hardware.
    ///
    /// The whole record is validated before the first write. An empty record
    /// writes nothing and fails with [`ErrorCode::NoMask`].
    pub fn apply_config(&self, conf: &Conf) -> Result<()> {
        self.check_fields(conf)?;
        let mut writes = Vec::new();
        for field in conf.present() {
            match attribute_name(field, conf.route_to) {
                Some(attr) => writes.push((field, attr)),
                None => return Err(ErrorCode::NoSet.into()),
            }
        }
        for (field, attr) in writes {
            let value = conf.value(field);
            if field == ConfField::ChnOffset {
                self.set_attr_signed(&attr, value as i32)?;
            } else {
                self.set_attr(&attr, value)?;
            }
        }
        Ok(())
    }

    /// Read back the fields present in `conf`.
    pub fn retrieve_config(&self, conf: &mut Conf) -> Result<()> {
        self.check_fields(conf)?;
        let fields: Vec<ConfField> = conf.present().collect();
        for field in fields {
            let value = match field {
                ConfField::AcqFreqHz => ACQ_FREQ_HZ,
                ConfField::AcqNBits => ACQ_N_BITS,
                _ => match attribute_name(field, conf.route_to) {
                    Some(attr) => self.get_attr(&attr)?,
                    None => return Err(ErrorCode::NoGet.into()),
                },
            };
            conf.store(field, value);
        }
        Ok(())
    }

    /// Allocate a buffer for `nsamples` samples per channel.
    pub fn request_buffer(&self, nsamples: usize) -> Buffer {
        self.request_buffer_with(nsamples, |size| vec![0; size])
    }

    /// Like [`Device::request_buffer`], with the payload memory coming from
    /// `alloc`.
    pub fn request_buffer_with(
        &self,
        nsamples: usize,
        alloc: impl FnOnce(usize) -> Vec<u8>,
    ) -> Buffer {
        let size = nsamples * self.sample_size;
        let mut data = alloc(size);
        data.resize(size, 0);
        debug!("buffer for {nsamples} samples ({size} bytes)");
        Buffer::new(nsamples, self.board.nchan as usize, data)
    }

    /// Wait for the next block and read its control block and samples into
    /// `buf`. A read aborted because the trigger was disabled reports
    /// [`ErrorCode::Disabled`].
    pub fn fill_buffer(&self, buf: &mut Buffer, timeout: Option<Duration>) -> Result<()> {
        if !self.ctrl.wait_readable(timeout)? {
            return Err(Error::Again);
        }
        let mut raw = [0u8; ZIO_CONTROL_SIZE];
        self.read_block(&*self.ctrl, &mut raw)?;

        let expected = buf.nsamples * self.board.nchan as usize;
        let ctrl = buf.set_metadata(raw);
        let (nsamples, len) = (ctrl.nsamples as usize, ctrl.payload_len());
        if nsamples != expected {
            debug!("block carries {nsamples} samples, buffer was sized for {expected}");
        }
        self.read_block(&*self.data, buf.data_mut(len))
    }

    fn read_block(&self, stream: &dyn DeviceStream, buf: &mut [u8]) -> Result<()> {
        let err = match read_full(stream, buf) {
            Ok(n) if n == buf.len() => return Ok(()),
            Ok(n) => io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read: {n} of {} bytes", buf.len()),
            ),
            Err(e) => e,
        };
        if self.trigger_enabled() {
            Err(Error::Io(err))
        } else {
            warn!("read aborted: {err}");
            Err(ErrorCode::Disabled.into())
        }
    }

    pub fn release_buffer(&self, buf: Buffer) {
        drop(buf);
    }

    /// Release a buffer whose memory came from a custom allocator.
    pub fn release_buffer_with(&self, buf: Buffer, free: impl FnOnce(Vec<u8>)) {
        free(buf.into_data());
    }
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}
