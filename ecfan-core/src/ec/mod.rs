//! EC access layer
//!
//! Two paths to the same register file: the port-level handshake protocol
//! ([`port`]) and the kernel's bulk debugfs image ([`sysfs`]). The [`Ec`]
//! facade prefers the bulk image for reads and downgrades to the port path
//! for the remainder of the process the first time the image misbehaves.
//!
//! All EC access is serialized on the control thread; nothing in this
//! module is shared across threads.

// Fake-hardware backend for tests only; the `test-util` feature lets
// dependent crates' test suites reach it without shipping it in release
// builds.
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod port;
pub mod sysfs;

use tracing::{debug, warn};

use ecfan_error::Result;

use crate::constants::ec as ec_const;
use port::{PortBus, PortTransport, RawPortBus};
use sysfs::SysfsImage;

/// Transport contract the sensor layer is written against.
///
/// `read_image` is an optional fast path: `None` means "no bulk snapshot
/// available, fall back to per-register reads".
pub trait EcTransport {
    fn read_register(&mut self, addr: u8) -> Result<u8>;
    fn write_register(&mut self, cmd: u8, port: u8, value: u8) -> Result<()>;

    fn read_image(&mut self) -> Option<[u8; ec_const::REG_SIZE]> {
        None
    }
}

/// Production transport: port protocol plus the latched bulk-read
/// preference.
pub struct Ec<B: PortBus = RawPortBus> {
    port: PortTransport<B>,
    image: SysfsImage,
    /// Set once the bulk path has failed; never cleared.
    ports_only: bool,
}

impl Ec<RawPortBus> {
    /// Build the transport over real hardware. The caller must have
    /// acquired port access already (see [`RawPortBus::acquire`]).
    pub fn new(bus: RawPortBus) -> Self {
        Self::with_parts(bus, SysfsImage::new())
    }
}

impl<B: PortBus> Ec<B> {
    pub fn with_parts(bus: B, image: SysfsImage) -> Self {
        let ports_only = !image.probe();
        if ports_only {
            debug!("EC bulk image not present, using port-level reads");
        } else {
            debug!(path = %image.path().display(), "EC bulk image available");
        }
        Self {
            port: PortTransport::new(bus),
            image,
            ports_only,
        }
    }

    /// Whether reads have been latched to the port path.
    pub fn ports_only(&self) -> bool {
        self.ports_only
    }
}

impl<B: PortBus> EcTransport for Ec<B> {
    fn read_register(&mut self, addr: u8) -> Result<u8> {
        self.port.read_register(addr)
    }

    fn write_register(&mut self, cmd: u8, port: u8, value: u8) -> Result<()> {
        self.port.write_register(cmd, port, value)
    }

    fn read_image(&mut self) -> Option<[u8; ec_const::REG_SIZE]> {
        if self.ports_only {
            return None;
        }
        match self.image.read() {
            Ok(buf) => Some(buf),
            Err(e) => {
                warn!("EC bulk read failed ({e}), using port-level reads from now on");
                self.ports_only = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Port bus that answers every handshake immediately.
    struct IdleBus;

    impl PortBus for IdleBus {
        fn inb(&mut self, port: u16) -> u8 {
            if port == ec_const::SC_PORT {
                0b01
            } else {
                0
            }
        }
        fn outb(&mut self, _port: u16, _value: u8) {}
    }

    #[test]
    fn test_missing_image_latches_at_construction() {
        let image = SysfsImage::with_path("/nonexistent/ec/io");
        let mut ec = Ec::with_parts(IdleBus, image);
        assert!(ec.ports_only());
        assert!(ec.read_image().is_none());
    }

    #[test]
    fn test_short_image_downgrades_permanently() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 12]).unwrap();

        let mut ec = Ec::with_parts(IdleBus, SysfsImage::with_path(f.path()));
        assert!(!ec.ports_only());
        assert!(ec.read_image().is_none());
        assert!(ec.ports_only());

        // Fixing the file afterwards must not matter: the preference is
        // latched for the process lifetime.
        f.write_all(&[0u8; 244]).unwrap();
        assert!(ec.read_image().is_none());
    }

    #[test]
    fn test_good_image_is_served() {
        let mut f = NamedTempFile::new().unwrap();
        let mut data = [0u8; ec_const::REG_SIZE];
        data[ec_const::REG_FAN_DUTY as usize] = 255;
        f.write_all(&data).unwrap();

        let mut ec = Ec::with_parts(IdleBus, SysfsImage::with_path(f.path()));
        let buf = ec.read_image().unwrap();
        assert_eq!(buf[ec_const::REG_FAN_DUTY as usize], 255);
        assert!(!ec.ports_only());
    }
}
