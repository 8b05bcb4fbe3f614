use crate::conf::{ConfField, ConfType};
use crate::error::{ErrorCode, Result};
use std::path::Path;

/// Static description of a supported board family.
#[derive(Debug)]
pub struct BoardType {
    pub name: &'static str,
    /// Prefix of the ZIO device names (`<devname>-<id>`).
    pub devname: &'static str,
    pub driver_type: &'static str,
    pub nchan: u32,
    /// Supported fields per configuration type, as [`ConfField::bit`] masks.
    capabilities: [u64; 3],
}

const fn bits(fields: &[ConfField]) -> u64 {
    let mut mask = 0;
    let mut i = 0;
    while i < fields.len() {
        mask |= 1 << (fields[i] as usize);
        i += 1;
    }
    mask
}

pub const FMCADC_100MS_4CH_14BIT: BoardType = BoardType {
    name: "fmc-adc-100m14b4cha",
    devname: "adc-100m14b",
    driver_type: "zio",
    nchan: 4,
    capabilities: [
        bits(&[
            ConfField::TrgSource,
            ConfField::TrgSourceChan,
            ConfField::TrgThreshold,
            ConfField::TrgPolarity,
            ConfField::TrgDelay,
        ]),
        bits(&[
            ConfField::AcqNShots,
            ConfField::AcqPostSamp,
            ConfField::AcqPreSamp,
            ConfField::AcqDecimation,
            ConfField::AcqFreqHz,
            ConfField::AcqNBits,
        ]),
        bits(&[
            ConfField::ChnRange,
            ConfField::ChnTermination,
            ConfField::ChnOffset,
        ]),
    ],
};

static BOARDS: &[&BoardType] = &[&FMCADC_100MS_4CH_14BIT];

impl BoardType {
    pub fn capabilities(&self, kind: ConfType) -> u64 {
        self.capabilities[kind as usize]
    }

    pub fn supports(&self, kind: ConfType, field: ConfField) -> bool {
        self.capabilities(kind) & field.bit() != 0
    }

    pub fn device_name(&self, dev_id: u32) -> String {
        format!("{}-{:04x}", self.devname, dev_id)
    }
}

/// Look a board family up by its name.
pub fn find(name: &str) -> Result<&'static BoardType> {
    BOARDS
        .iter()
        .copied()
        .find(|b| b.name == name)
        .ok_or_else(|| ErrorCode::NotSupported.into())
}

/// Map a logical unit number to a ZIO device id.
///
/// udev publishes `<dev_root>/<board>.<lun>` as a link to the ZIO device node;
/// the id is the hex suffix of the link target. Without the link the LUN is
/// taken to be the device id itself.
pub fn resolve_lun(board: &BoardType, dev_root: &Path, lun: u32) -> u32 {
    let link = dev_root.join(format!("{}.{}", board.name, lun));
    let target = match std::fs::read_link(&link) {
        Ok(target) => target,
        Err(_) => return lun,
    };
    let prefix = format!("{}-", board.devname);
    target
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(&prefix))
        .and_then(|id| id.get(..4))
        .and_then(|id| u32::from_str_radix(id, 16).ok())
        .unwrap_or_else(|| {
            log::warn!("cannot parse {}, using LUN {lun} as device id", link.display());
            lun
        })
}
