//! `opensensor scan`: list sensor channels and whether each one is available.

use opensensor_core::{ChannelStatus, HardwarePaths, Settings, detect_channels};

fn status_line(status: &ChannelStatus) -> String {
    let mark = if status.available { "\u{2705}" } else { "\u{274C}" };
    match (&status.last_fault, status.available) {
        (Some(fault), false) => format!("{mark} {:<16} {fault}", status.name),
        _ => format!("{mark} {:<16} {}", status.name, status.label()),
    }
}

pub fn run(settings: &Settings) {
    let paths = HardwarePaths::from(&settings.collector);
    println!("IIO root:     {}", paths.iio_root.display());
    println!("Thermal zone: {}", paths.thermal_zone.display());
    println!("PMS5003:      {}", paths.pms5003_device.display());
    println!();

    let channels = detect_channels(&paths);
    println!(
        "Found {}/{} available sensor channel(s):\n",
        channels.available_count(),
        channels.total()
    );

    let statuses = channels
        .measurement
        .iter()
        .map(|c| c.status())
        .chain(std::iter::once(channels.heat_source.status()));
    for status in statuses {
        println!("  {}", status_line(status));
    }
}
