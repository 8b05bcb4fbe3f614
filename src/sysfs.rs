use crate::error::{Error, Result};
use std::{fs, io, path::PathBuf};

/// Key/value access to the driver attributes of one device.
///
/// Names are relative to the device, e.g. `cset0/fsm-command`.
pub trait AttributeStore: Send + Sync {
    fn read(&self, name: &str) -> io::Result<String>;
    fn write(&self, name: &str, value: &str) -> io::Result<()>;
}

/// Read an attribute as an integer. Sysfs prints signed values, which are
/// kept as their 32-bit pattern.
pub fn get_u32(store: &dyn AttributeStore, name: &str) -> Result<u32> {
    let raw = store.read(name).map_err(|source| Error::Attribute {
        attr: name.to_string(),
        source,
    })?;
    let text = raw.trim();
    text.parse::<u32>()
        .or_else(|_| text.parse::<i32>().map(|v| v as u32))
        .map_err(|_| Error::InvalidValue {
            attr: name.to_string(),
            value: text.to_string(),
        })
}

pub fn set_u32(store: &dyn AttributeStore, name: &str, value: u32) -> Result<()> {
    store
        .write(name, &value.to_string())
        .map_err(|source| Error::Attribute {
            attr: name.to_string(),
            source,
        })
}

pub fn set_i32(store: &dyn AttributeStore, name: &str, value: i32) -> Result<()> {
    store
        .write(name, &value.to_string())
        .map_err(|source| Error::Attribute {
            attr: name.to_string(),
            source,
        })
}

/// Attributes of a device directory under `/sys/bus/zio/devices`.
#[derive(Debug, Clone)]
pub struct SysfsStore {
    base: PathBuf,
}

impl SysfsStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &PathBuf {
        &self.base
    }
}

impl AttributeStore for SysfsStore {
    fn read(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.base.join(name))
    }

    fn write(&self, name: &str, value: &str) -> io::Result<()> {
        // sysfs wants the whole value in a single write
        fs::write(self.base.join(name), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("cset0")).unwrap();
        let store = SysfsStore::new(dir.path());

        set_u32(&store, "cset0/fsm-command", 1).unwrap();
        assert_eq!(get_u32(&store, "cset0/fsm-command").unwrap(), 1);

        set_i32(&store, "cset0/ch0-offset", -250).unwrap();
        assert_eq!(get_u32(&store, "cset0/ch0-offset").unwrap() as i32, -250);
    }

    #[test]
    fn missing_and_garbage_attributes_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = SysfsStore::new(dir.path());
        assert!(matches!(
            get_u32(&store, "nope"),
            Err(Error::Attribute { .. })
        ));

        fs::write(dir.path().join("junk"), "abc\n").unwrap();
        assert!(matches!(
            get_u32(&store, "junk"),
            Err(Error::InvalidValue { .. })
        ));
    }
}
