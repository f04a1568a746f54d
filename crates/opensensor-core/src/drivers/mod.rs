//! Linux drivers for the Enviro+ sensor set.
//!
//! The weather, gas and light sensors are read through the kernel IIO
//! subsystem in sysfs; the particulate sensor over a serial port; the CPU
//! temperature from the thermal zone. Every driver is fallible at open time
//! and reports [`Fault`]s on read.

pub mod iio;
pub mod pms5003;
pub mod thermal;

use std::path::Path;

use crate::channel::FieldSample;
use crate::error::Fault;
use crate::reading::Field;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Read a sysfs attribute as a trimmed string.
pub(crate) fn read_attr(path: &Path) -> Result<String, Fault> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Fault::Io(format!("{}: {e}", path.display())))
}

/// Read a sysfs attribute as a finite number.
pub(crate) fn read_number(path: &Path) -> Result<f64, Fault> {
    let text = read_attr(path)?;
    let value: f64 = text
        .parse()
        .map_err(|_| Fault::Protocol(format!("{}: '{text}' is not a number", path.display())))?;
    if !value.is_finite() {
        return Err(Fault::InvalidValue(format!("{}: {value}", path.display())));
    }
    Ok(value)
}

/// Gather per-field results into one sample.
///
/// A field that fails is left out so the rest of the channel still counts.
/// The read only faults when no field could be read at all.
pub(crate) fn partial_sample<I>(reads: I) -> Result<FieldSample, Fault>
where
    I: IntoIterator<Item = (Field, Result<f64, Fault>)>,
{
    let mut sample = FieldSample::new();
    let mut first_fault = None;
    for (field, result) in reads {
        match result {
            Ok(v) => sample.push((field, v)),
            Err(e) => {
                log::debug!("{field}: {e}");
                first_fault.get_or_insert(e);
            }
        }
    }
    match first_fault {
        Some(fault) if sample.is_empty() => Err(fault),
        _ => Ok(sample),
    }
}
