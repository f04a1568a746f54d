//! CPU temperature from the Linux thermal zone. Used as the heat source for
//! temperature compensation.

use std::path::{Path, PathBuf};

use crate::channel::{ChannelInfo, SensorDriver};
use crate::error::Fault;

use super::read_number;

pub const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

static CPU_INFO: ChannelInfo = ChannelInfo {
    name: "cpu_temperature",
    description: "CPU thermal zone (heat source for compensation)",
    fields: &[],
};

pub struct CpuThermal {
    path: PathBuf,
}

impl CpuThermal {
    pub fn open(path: &Path) -> Result<Self, Fault> {
        let driver = Self {
            path: path.to_path_buf(),
        };
        driver
            .celsius()
            .map_err(|e| Fault::Unavailable(format!("{}: {e}", path.display())))?;
        Ok(driver)
    }

    fn celsius(&self) -> Result<f64, Fault> {
        // milli-degrees C
        read_number(&self.path).map(|m| m / 1000.0)
    }
}

impl SensorDriver for CpuThermal {
    type Output = f64;

    fn info(&self) -> &ChannelInfo {
        &CPU_INFO
    }

    fn read(&mut self) -> Result<f64, Fault> {
        self.celsius()
    }
}
