//! Plantower PMS5003 particulate sensor on a serial port.
//!
//! The sensor streams 32-byte frames at 9600 8N1:
//!
//! ```text
//! 0x42 0x4D  len(2)  13 data words (big-endian u16)  checksum(2)
//! ```
//!
//! `len` is always 28 and the checksum is the sum of the first 30 bytes.
//!
//! The sensor keeps streaming between reads, so the kernel's input queue
//! holds old frames by the next tick. Each read discards that backlog first
//! and decodes the next frame to arrive.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use log::debug;

use crate::channel::{ChannelInfo, FieldSample, SensorDriver};
use crate::error::Fault;
use crate::reading::Field;

pub const FRAME_LEN: usize = 32;
const START: [u8; 2] = [0x42, 0x4D];
const BODY_LEN: u16 = 28;

/// How many bytes to skip looking for a frame start before giving up.
const MAX_SYNC_BYTES: usize = FRAME_LEN * 4;

static PMS_INFO: ChannelInfo = ChannelInfo {
    name: "particulates",
    description: "PMS5003 particulate mass and particle counts",
    fields: &[
        Field::Pm1,
        Field::Pm25,
        Field::Pm10,
        Field::Particles03um,
        Field::Particles05um,
        Field::Particles10um,
        Field::Particles25um,
        Field::Particles50um,
        Field::Particles100um,
    ],
};

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One decoded measurement frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmsFrame {
    /// PM1.0, PM2.5, PM10 in µg/m³, standard particle (CF=1).
    pub pm_standard: [u16; 3],
    /// PM1.0, PM2.5, PM10 in µg/m³, atmospheric environment.
    pub pm_atmospheric: [u16; 3],
    /// Particles beyond 0.3, 0.5, 1.0, 2.5, 5.0, 10 µm per 0.1 L of air.
    pub counts: [u16; 6],
}

impl PmsFrame {
    pub fn parse(buf: &[u8; FRAME_LEN]) -> Result<Self, Fault> {
        if buf[..2] != START {
            return Err(Fault::Protocol(format!(
                "bad frame start {:02x} {:02x}",
                buf[0], buf[1]
            )));
        }
        let word = |i: usize| u16::from_be_bytes([buf[i], buf[i + 1]]);

        let len = word(2);
        if len != BODY_LEN {
            return Err(Fault::Protocol(format!("bad frame length {len}")));
        }
        let expected = buf[..30]
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
        let got = word(30);
        if got != expected {
            return Err(Fault::Protocol(format!(
                "checksum mismatch: frame says {got:#06x}, computed {expected:#06x}"
            )));
        }

        let data = |n: usize| word(4 + 2 * n);
        Ok(Self {
            pm_standard: [data(0), data(1), data(2)],
            pm_atmospheric: [data(3), data(4), data(5)],
            counts: [data(6), data(7), data(8), data(9), data(10), data(11)],
        })
    }

    pub fn to_sample(&self) -> FieldSample {
        let [pm1, pm25, pm10] = self.pm_standard.map(f64::from);
        let c = self.counts.map(f64::from);
        vec![
            (Field::Pm1, pm1),
            (Field::Pm25, pm25),
            (Field::Pm10, pm10),
            (Field::Particles03um, c[0]),
            (Field::Particles05um, c[1]),
            (Field::Particles10um, c[2]),
            (Field::Particles25um, c[3]),
            (Field::Particles50um, c[4]),
            (Field::Particles100um, c[5]),
        ]
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// A byte stream that can drop whatever is already buffered for reading.
pub trait SerialPort: Read {
    /// Throw away received but unread input.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialPort for File {
    #[cfg(unix)]
    fn discard_input(&mut self) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `self` and open for the call.
        if unsafe { libc::tcflush(self.as_raw_fd(), libc::TCIFLUSH) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// In-memory streams have no backlog.
impl<T: AsRef<[u8]>> SerialPort for Cursor<T> {}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Reads frames from any byte stream. The stream must bound its own reads
/// (a serial port configured with a read timeout).
pub struct Pms5003<R> {
    port: R,
}

impl<R: SerialPort> Pms5003<R> {
    pub fn new(port: R) -> Self {
        Self { port }
    }

    fn read_byte(&mut self) -> Result<u8, Fault> {
        let mut b = [0u8; 1];
        self.port.read_exact(&mut b)?;
        Ok(b[0])
    }

    /// Skip to the next frame start, then read and decode one frame.
    pub fn read_frame(&mut self) -> Result<PmsFrame, Fault> {
        let mut prev = self.read_byte()?;
        let mut synced = false;
        for _ in 0..MAX_SYNC_BYTES {
            let b = self.read_byte()?;
            if prev == START[0] && b == START[1] {
                synced = true;
                break;
            }
            prev = b;
        }
        if !synced {
            return Err(Fault::Protocol(format!(
                "no frame start in {MAX_SYNC_BYTES} bytes"
            )));
        }

        let mut buf = [0u8; FRAME_LEN];
        buf[..2].copy_from_slice(&START);
        self.port.read_exact(&mut buf[2..])?;
        PmsFrame::parse(&buf)
    }

    /// Drop stale input, then read the next complete frame.
    pub fn read_latest(&mut self) -> Result<PmsFrame, Fault> {
        if let Err(e) = self.port.discard_input() {
            debug!("particulates: could not discard stale input: {e}");
        }
        self.read_frame()
    }
}

impl Pms5003<File> {
    /// Open and configure a serial device (9600 8N1, 1 s read timeout).
    pub fn open(device: &Path) -> Result<Self, Fault> {
        let unavailable = |e: std::io::Error| Fault::Unavailable(format!("{}: {e}", device.display()));
        let port = open_serial(device).map_err(unavailable)?;
        let mut driver = Self::new(port);
        driver.read_frame()?;
        Ok(driver)
    }
}

impl<R: SerialPort + Send> SensorDriver for Pms5003<R> {
    type Output = FieldSample;

    fn info(&self) -> &ChannelInfo {
        &PMS_INFO
    }

    fn read(&mut self) -> Result<FieldSample, Fault> {
        self.read_latest().map(|f| f.to_sample())
    }
}

// ---------------------------------------------------------------------------
// Serial port setup
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn open_serial(device: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(device)?;
    let fd = file.as_raw_fd();

    // SAFETY: `fd` is a valid open descriptor owned by `file` for the whole
    // block, and `tio` is a plain C struct fully initialised by tcgetattr.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, libc::B9600) != 0
            || libc::cfsetospeed(&mut tio, libc::B9600) != 0
        {
            return Err(std::io::Error::last_os_error());
        }
        tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB);
        tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
        // Return after 1 s without data instead of blocking forever.
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 10;
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::tcflush(fd, libc::TCIFLUSH);
    }
    Ok(file)
}

#[cfg(not(unix))]
fn open_serial(_device: &Path) -> std::io::Result<File> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "serial sensors need a Unix host",
    ))
}
