use crate::zio::{ZioControl, ZIO_CONTROL_SIZE};
use ndarray::Array2;

/// Memory for one shot: the control block the driver sent and the raw
/// interleaved samples that followed it.
#[derive(Debug)]
pub struct Buffer {
    /// Samples per channel requested when the buffer was allocated.
    pub nsamples: usize,
    nchan: usize,
    raw_ctrl: [u8; ZIO_CONTROL_SIZE],
    metadata: Option<ZioControl>,
    data: Vec<u8>,
}

impl Buffer {
    pub(crate) fn new(nsamples: usize, nchan: usize, data: Vec<u8>) -> Self {
        Self {
            nsamples,
            nchan,
            raw_ctrl: [0; ZIO_CONTROL_SIZE],
            metadata: None,
            data,
        }
    }

    pub(crate) fn set_metadata(&mut self, raw: [u8; ZIO_CONTROL_SIZE]) -> &ZioControl {
        self.raw_ctrl = raw;
        self.metadata.insert(ZioControl::decode(&raw))
    }

    pub(crate) fn data_mut(&mut self, len: usize) -> &mut [u8] {
        if self.data.len() != len {
            self.data.resize(len, 0);
        }
        &mut self.data[..len]
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Decoded control block of the last fill, if any.
    pub fn metadata(&self) -> Option<&ZioControl> {
        self.metadata.as_ref()
    }

    /// The control block exactly as read from the device.
    pub fn raw_metadata(&self) -> &[u8; ZIO_CONTROL_SIZE] {
        &self.raw_ctrl
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn nchan(&self) -> usize {
        self.nchan
    }

    /// Payload as native-endian 16-bit samples.
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    /// Samples arranged as (sample index, channel).
    pub fn waveform(&self) -> Array2<i16> {
        let mut samples = self.samples();
        let rows = samples.len() / self.nchan.max(1);
        samples.truncate(rows * self.nchan);
        Array2::from_shape_vec((rows, self.nchan), samples)
            .unwrap_or_else(|_| Array2::zeros((0, self.nchan)))
    }
}
