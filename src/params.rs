use crate::conf::{ConfField, ConfType};
use crate::device::{attribute_name, Device};
use log::info;

/// Board-level attributes worth reporting besides the configuration fields.
const DEVICE_PARAMS: &[&str] = &[
    "cset0/fsm-command",
    "cset0/fsm-state",
    "cset0/trigger/enable",
    "cset0/trigger/sw-trg-enable",
    "cset0/chani-value",
    "cset0/temperature",
    "cset0/max-sample-mode",
];

/// Per-channel configuration fields.
const CHANNEL_FIELDS: &[ConfField] = &[
    ConfField::ChnRange,
    ConfField::ChnTermination,
    ConfField::ChnOffset,
];

/// Collect every readable attribute of `dev` as `name: value` lines.
pub fn dump(dev: &Device) -> String {
    let mut param_log = String::new();

    for field in ConfField::ALL {
        if field.conf_type() == ConfType::Channel {
            continue;
        }
        if let Some(attr) = attribute_name(field, 0) {
            if let Ok(value) = dev.get_attr(&attr) {
                param_log.push_str(&format!("{attr}: {value}\n"));
            }
        }
    }

    for &attr in DEVICE_PARAMS {
        if let Ok(value) = dev.get_attr(attr) {
            param_log.push_str(&format!("{attr}: {value}\n"));
        }
    }

    for &field in CHANNEL_FIELDS {
        for ch in 0..dev.board().nchan {
            let Some(attr) = attribute_name(field, ch) else {
                continue;
            };
            match dev.get_attr(&attr) {
                Ok(value) if field == ConfField::ChnOffset => {
                    param_log.push_str(&format!("{attr}: {}\n", value as i32));
                }
                Ok(value) => param_log.push_str(&format!("{attr}: {value}\n")),
                Err(_) => continue,
            }
        }
    }

    if param_log.ends_with('\n') {
        param_log.pop();
    }
    param_log
}

pub fn log_all(dev: &Device) {
    info!(
        "{} parameters:\n{}",
        dev.board().device_name(dev.dev_id()),
        dump(dev)
    );
}
