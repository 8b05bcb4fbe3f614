use crate::buffer::Buffer;
use anyhow::{bail, Context, Result};
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// What to do with every acquired shot.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    /// Append control block and samples of every shot to one file.
    SingleFile(PathBuf),
    /// Two files per shot, `<base>.NNN.ctrl` and `<base>.NNN.data`.
    MultiFile(PathBuf),
    /// Print the samples; `Some(n)` limits to the first (`n > 0`) or last
    /// (`n < 0`) samples.
    Preview(Option<i64>),
    /// Configure the board and never read.
    ConfigOnly,
}

/// One filled buffer handed to a sink.
pub struct Shot<'a> {
    pub index: u32,
    pub total: u32,
    pub pre_samples: u32,
    pub buf: &'a Buffer,
}

impl Shot<'_> {
    /// Payload bytes announced by the control block.
    pub fn payload(&self) -> &[u8] {
        let data = self.buf.data();
        let len = self
            .buf
            .metadata()
            .map_or(data.len(), |m| m.payload_len().min(data.len()));
        &data[..len]
    }
}

pub trait ShotSink {
    fn wants_data(&self) -> bool {
        true
    }

    fn write_shot(&mut self, shot: &Shot) -> Result<()>;

    /// Called after every pass over the shots of one acquisition.
    fn end_loop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open the sink for `mode`, failing early if the output cannot be created.
pub fn open_sink(mode: &OutputMode) -> Result<Box<dyn ShotSink + Send>> {
    Ok(match mode {
        OutputMode::SingleFile(path) => Box::new(SingleFileSink::create(path)?),
        OutputMode::MultiFile(base) => Box::new(MultiFileSink::create(base)?),
        OutputMode::Preview(show) => Box::new(PreviewSink::new(*show, std::io::stdout())),
        OutputMode::ConfigOnly => Box::new(ConfigOnly),
    })
}

fn write_all(out: &mut impl Write, bytes: &[u8], path: &Path) -> Result<()> {
    out.write_all(bytes)
        .with_context(|| format!("write({}): short write", path.display()))
}

pub struct SingleFileSink {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SingleFileSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("{}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }
}

impl ShotSink for SingleFileSink {
    fn write_shot(&mut self, shot: &Shot) -> Result<()> {
        write_all(&mut self.out, shot.buf.raw_metadata(), &self.path)?;
        write_all(&mut self.out, shot.payload(), &self.path)
    }

    fn end_loop(&mut self) -> Result<()> {
        self.out
            .flush()
            .with_context(|| format!("write({}): short write", self.path.display()))
    }
}

pub struct MultiFileSink {
    base: PathBuf,
}

impl MultiFileSink {
    pub fn create(base: &Path) -> Result<Self> {
        let sink = Self {
            base: base.to_path_buf(),
        };
        // make sure the first file can be created before acquiring anything
        let first = sink.path(0, "ctrl");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&first)
            .with_context(|| format!("{}", first.display()))?;
        Ok(sink)
    }

    pub fn path(&self, index: u32, ext: &str) -> PathBuf {
        let mut name = self.base.as_os_str().to_owned();
        name.push(format!(".{index:03}.{ext}"));
        PathBuf::from(name)
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = File::create(path).with_context(|| format!("{}", path.display()))?;
        write_all(&mut file, bytes, path)
    }
}

impl ShotSink for MultiFileSink {
    fn write_shot(&mut self, shot: &Shot) -> Result<()> {
        self.write_file(&self.path(shot.index, "ctrl"), shot.buf.raw_metadata())?;
        self.write_file(&self.path(shot.index, "data"), shot.payload())
    }
}

/// Prints samples, one row per sample index with a column per channel.
pub struct PreviewSink<W> {
    show: Option<i64>,
    out: W,
}

impl<W: Write> PreviewSink<W> {
    pub fn new(show: Option<i64>, out: W) -> Self {
        Self { show, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn selected(&self, row: usize, rows: usize) -> bool {
        match self.show {
            None => true,
            Some(n) if n > 0 => (row as i64) < n,
            Some(n) => ((rows - row) as u64) <= n.unsigned_abs(),
        }
    }
}

impl<W: Write> ShotSink for PreviewSink<W> {
    fn write_shot(&mut self, shot: &Shot) -> Result<()> {
        if self.show == Some(0) {
            return Ok(());
        }
        let nchan = shot.buf.nchan().max(1);
        let announced = shot.buf.metadata().map_or(0, |m| m.nsamples as usize / nchan);
        if announced != shot.buf.nsamples {
            writeln!(
                self.out,
                "discrepancy between ctrl->nsamples: {} and buf->nsamples: {}",
                announced * nchan,
                shot.buf.nsamples
            )?;
            return Ok(());
        }

        let waveform = shot.buf.waveform();
        let rows = waveform.nrows();
        for (j, row) in waveform.rows().into_iter().enumerate() {
            if !self.selected(j, rows) {
                continue;
            }
            write!(self.out, "{:5}     ", j as i64 - i64::from(shot.pre_samples))?;
            for sample in row {
                write!(self.out, "{sample:7}")?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn end_loop(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

pub struct ConfigOnly;

impl ShotSink for ConfigOnly {
    fn wants_data(&self) -> bool {
        false
    }

    fn write_shot(&mut self, _shot: &Shot) -> Result<()> {
        Ok(())
    }
}

/// Name of the plot data file for one channel of a device.
pub fn plot_path(dir: &Path, lun: u32, channel: u32) -> PathBuf {
    dir.join(format!("fmcadc.0x{lun:04x}.ch{channel}.dat"))
}

/// Write the plot file of `channel` for device `lun` into `dir`, returning
/// its path.
pub fn write_plot(
    dir: &Path,
    lun: u32,
    buf: &Buffer,
    channel: u32,
    bit_scale: f64,
) -> Result<PathBuf> {
    let path = plot_path(dir, lun, channel);
    write_plot_file(&path, buf, channel, bit_scale)?;
    Ok(path)
}

/// Write `index volts` lines for `channel` (1-based) of the last shot.
pub fn write_plot_file(path: &Path, buf: &Buffer, channel: u32, bit_scale: f64) -> Result<()> {
    if channel == 0 || channel as usize > buf.nchan() {
        bail!("illegal channel number {channel}");
    }
    let waveform = buf.waveform();
    let column = waveform.column(channel as usize - 1);
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("fopen {} failed", path.display()))?,
    );
    for (i, sample) in column.iter().enumerate() {
        writeln!(out, "{} {}", i, f64::from(*sample) * bit_scale)?;
    }
    out.flush()?;
    Ok(())
}

/// Hand the plot file to gnuplot.
pub fn run_gnuplot(path: &Path, x11: bool) -> Result<()> {
    let term = if x11 { "set term x11; " } else { "set term dumb; " };
    let script = format!("{term}plot '{}' with lines\n", path.display());

    let mut child = Command::new("gnuplot")
        .arg("-persist")
        .stdin(Stdio::piped())
        .spawn()
        .context("cannot run gnuplot")?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(script.as_bytes())?;
    }
    let status = child.wait()?;
    if !status.success() {
        bail!("gnuplot exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zio::{ZioControl, ZIO_CONTROL_SIZE};

    fn filled(nsamples: usize, samples: &[i16]) -> Buffer {
        let data = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        let mut buf = Buffer::new(nsamples, 4, data);
        let ctrl = ZioControl {
            nsamples: samples.len() as u32,
            ssize: 2,
            ..Default::default()
        };
        buf.set_metadata(ctrl.encode());
        buf
    }

    fn shot(buf: &Buffer, index: u32, pre: u32) -> Shot<'_> {
        Shot {
            index,
            total: 1,
            pre_samples: pre,
            buf,
        }
    }

    #[test]
    fn preview_prints_rows_relative_to_trigger() {
        let buf = filled(2, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut sink = PreviewSink::new(None, Vec::new());
        sink.write_shot(&shot(&buf, 0, 1)).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            text,
            "   -1           1      2      3      4\n    0           5      6      7      8\n"
        );
    }

    #[test]
    fn preview_tail_selection() {
        let samples: Vec<i16> = (0..16).collect();
        let buf = filled(4, &samples);
        let mut sink = PreviewSink::new(Some(-1), Vec::new());
        sink.write_shot(&shot(&buf, 0, 0)).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("    3 "));
    }

    #[test]
    fn preview_tail_wider_than_the_shot() {
        let samples: Vec<i16> = (0..8).collect();
        let buf = filled(2, &samples);
        let mut sink = PreviewSink::new(Some(i64::MIN), Vec::new());
        sink.write_shot(&shot(&buf, 0, 0)).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn multi_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MultiFileSink::create(&dir.path().join("run")).unwrap();
        assert!(dir.path().join("run.000.ctrl").exists());
        assert_eq!(sink.path(12, "data"), dir.path().join("run.012.data"));
    }

    #[test]
    fn multi_file_writes_pair_per_shot() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = MultiFileSink::create(&dir.path().join("run")).unwrap();
        let buf = filled(1, &[1, 2, 3, 4]);
        sink.write_shot(&shot(&buf, 1, 0)).unwrap();

        let ctrl = std::fs::read(dir.path().join("run.001.ctrl")).unwrap();
        let data = std::fs::read(dir.path().join("run.001.data")).unwrap();
        assert_eq!(ctrl.len(), ZIO_CONTROL_SIZE);
        assert_eq!(data.len(), 8);
    }

    #[test]
    fn plot_file_scales_one_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = plot_path(dir.path(), 0x200, 2);
        assert!(path.ends_with("fmcadc.0x0200.ch2.dat"));

        let buf = filled(2, &[0, 100, 0, 0, 0, -200, 0, 0]);
        write_plot_file(&path, &buf, 2, 0.5).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0 50\n1 -100\n");

        assert!(write_plot_file(&path, &buf, 5, 0.5).is_err());
    }

    #[test]
    fn plot_file_is_named_after_the_lun() {
        let dir = tempfile::tempdir().unwrap();
        let buf = filled(1, &[10, 20, 30, 40]);
        let path = write_plot(dir.path(), 0x3, &buf, 1, 1.0).unwrap();

        assert_eq!(path, dir.path().join("fmcadc.0x0003.ch1.dat"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0 10\n");
    }
}
