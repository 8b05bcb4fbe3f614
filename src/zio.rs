//! The fixed-layout control block the ZIO framework emits before each block of
//! samples.
//!
//! Only the fields the library and tools look at are decoded; the raw bytes are
//! kept around by [`crate::Buffer`] so they can be written out verbatim.

/// Size of a control block on the wire.
pub const ZIO_CONTROL_SIZE: usize = 512;

const OFF_SEQ_NUM: usize = 4;
const OFF_NSAMPLES: usize = 8;
const OFF_SSIZE: usize = 12;
const OFF_NBITS: usize = 14;
const OFF_DEV_ID: usize = 28;
const OFF_CSET: usize = 32;
const OFF_CHAN: usize = 34;
const OFF_DEVNAME: usize = 36;
const OFF_TSTAMP: usize = 48;
const OFF_TRIGGERNAME: usize = 84;
const NAME_LEN: usize = 12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: u64,
    pub ticks: u64,
    pub bins: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZioControl {
    pub major_version: u8,
    pub minor_version: u8,
    pub seq_num: u32,
    /// Samples in the block, counting every channel of the set.
    pub nsamples: u32,
    /// Size of one sample in bytes.
    pub ssize: u16,
    pub nbits: u16,
    pub dev_id: u32,
    pub cset: u16,
    pub chan: u16,
    pub devname: String,
    pub tstamp: Timestamp,
    pub triggername: String,
}

fn u16_at(raw: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes([raw[off], raw[off + 1]])
}

fn u32_at(raw: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&raw[off..off + 4]);
    u32::from_ne_bytes(b)
}

fn u64_at(raw: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&raw[off..off + 8]);
    u64::from_ne_bytes(b)
}

fn name_at(raw: &[u8], off: usize) -> String {
    let field = &raw[off..off + NAME_LEN];
    let end = field.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn put_name(raw: &mut [u8], off: usize, name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN - 1);
    raw[off..off + n].copy_from_slice(&bytes[..n]);
}

impl ZioControl {
    pub fn decode(raw: &[u8; ZIO_CONTROL_SIZE]) -> Self {
        Self {
            major_version: raw[0],
            minor_version: raw[1],
            seq_num: u32_at(raw, OFF_SEQ_NUM),
            nsamples: u32_at(raw, OFF_NSAMPLES),
            ssize: u16_at(raw, OFF_SSIZE),
            nbits: u16_at(raw, OFF_NBITS),
            dev_id: u32_at(raw, OFF_DEV_ID),
            cset: u16_at(raw, OFF_CSET),
            chan: u16_at(raw, OFF_CHAN),
            devname: name_at(raw, OFF_DEVNAME),
            tstamp: Timestamp {
                secs: u64_at(raw, OFF_TSTAMP),
                ticks: u64_at(raw, OFF_TSTAMP + 8),
                bins: u64_at(raw, OFF_TSTAMP + 16),
            },
            triggername: name_at(raw, OFF_TRIGGERNAME),
        }
    }

    pub fn encode(&self) -> [u8; ZIO_CONTROL_SIZE] {
        let mut raw = [0u8; ZIO_CONTROL_SIZE];
        raw[0] = self.major_version;
        raw[1] = self.minor_version;
        raw[OFF_SEQ_NUM..OFF_SEQ_NUM + 4].copy_from_slice(&self.seq_num.to_ne_bytes());
        raw[OFF_NSAMPLES..OFF_NSAMPLES + 4].copy_from_slice(&self.nsamples.to_ne_bytes());
        raw[OFF_SSIZE..OFF_SSIZE + 2].copy_from_slice(&self.ssize.to_ne_bytes());
        raw[OFF_NBITS..OFF_NBITS + 2].copy_from_slice(&self.nbits.to_ne_bytes());
        raw[OFF_DEV_ID..OFF_DEV_ID + 4].copy_from_slice(&self.dev_id.to_ne_bytes());
        raw[OFF_CSET..OFF_CSET + 2].copy_from_slice(&self.cset.to_ne_bytes());
        raw[OFF_CHAN..OFF_CHAN + 2].copy_from_slice(&self.chan.to_ne_bytes());
        put_name(&mut raw, OFF_DEVNAME, &self.devname);
        raw[OFF_TSTAMP..OFF_TSTAMP + 8].copy_from_slice(&self.tstamp.secs.to_ne_bytes());
        raw[OFF_TSTAMP + 8..OFF_TSTAMP + 16].copy_from_slice(&self.tstamp.ticks.to_ne_bytes());
        raw[OFF_TSTAMP + 16..OFF_TSTAMP + 24].copy_from_slice(&self.tstamp.bins.to_ne_bytes());
        put_name(&mut raw, OFF_TRIGGERNAME, &self.triggername);
        raw
    }

    /// Payload bytes that follow this block on the data stream.
    pub fn payload_len(&self) -> usize {
        self.nsamples as usize * self.ssize as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fields_at_their_offsets() {
        let mut raw = [0u8; ZIO_CONTROL_SIZE];
        raw[0] = 1;
        raw[1] = 2;
        raw[8..12].copy_from_slice(&64u32.to_ne_bytes());
        raw[12..14].copy_from_slice(&2u16.to_ne_bytes());
        raw[48..56].copy_from_slice(&1_700_000_000u64.to_ne_bytes());
        raw[84..88].copy_from_slice(b"user");

        let ctrl = ZioControl::decode(&raw);
        assert_eq!((ctrl.major_version, ctrl.minor_version), (1, 2));
        assert_eq!(ctrl.nsamples, 64);
        assert_eq!(ctrl.ssize, 2);
        assert_eq!(ctrl.payload_len(), 128);
        assert_eq!(ctrl.tstamp.secs, 1_700_000_000);
        assert_eq!(ctrl.triggername, "user");
    }

    #[test]
    fn long_names_are_truncated() {
        let ctrl = ZioControl {
            devname: "adc-100m14b-0200-extra".into(),
            ..Default::default()
        };
        let back = ZioControl::decode(&ctrl.encode());
        assert_eq!(back.devname, "adc-100m14b");
    }
}
