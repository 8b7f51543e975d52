use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Thread-safe PCAP writer capturing whole message frames.
#[derive(Clone)]
pub struct WireRecorder {
    inner: Arc<Mutex<PcapWriter>>,
}

impl WireRecorder {
    /// Create a recorder writing to `path`, truncating any existing file.
    pub fn create(path: &Path) -> io::Result<Self> {
        let writer = PcapWriter::new(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(writer)),
        })
    }

    /// Append one frame stamped with the current time.
    pub fn record(&self, frame: &[u8]) -> io::Result<()> {
        self.inner.lock().write_frame(SystemTime::now(), frame)
    }
}

impl std::fmt::Debug for WireRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireRecorder").finish_non_exhaustive()
    }
}

struct PcapWriter {
    out: BufWriter<File>,
}

impl PcapWriter {
    fn new(path: &Path) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&global_header())?;
        out.flush()?;
        Ok(Self { out })
    }

    fn write_frame(&mut self, timestamp: SystemTime, frame: &[u8]) -> io::Result<()> {
        let (sec, usec) = split_timestamp(timestamp);
        let captured = &frame[..frame.len().min(PCAP_SNAPLEN as usize)];
        let length = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        for field in [sec, usec, length(captured.len()), length(frame.len())] {
            self.out.write_all(&field.to_le_bytes())?;
        }
        self.out.write_all(captured)?;
        self.out.flush()
    }
}

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION: (u16, u16) = (2, 4);
const PCAP_SNAPLEN: u32 = 128 * 1024 * 1024;
const LINKTYPE_DBUS: u32 = 231;

fn global_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(24);
    header.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
    header.extend_from_slice(&PCAP_VERSION.0.to_le_bytes());
    header.extend_from_slice(&PCAP_VERSION.1.to_le_bytes());
    // thiszone, sigfigs
    header.extend_from_slice(&[0u8; 8]);
    header.extend_from_slice(&PCAP_SNAPLEN.to_le_bytes());
    header.extend_from_slice(&LINKTYPE_DBUS.to_le_bytes());
    header
}

fn split_timestamp(timestamp: SystemTime) -> (u32, u32) {
    let duration = timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
    (secs, duration.subsec_micros())
}
