//! Port-level EC protocol
//!
//! The EC is addressed through two byte-wide I/O ports: a status/command
//! port and a data port. Every byte moved across the interface is preceded
//! by a wait on the input-buffer-full (IBF) or output-buffer-full (OBF)
//! flag of the status port, with a bounded spin so a wedged controller
//! cannot hang the daemon.
//!
//! Raw port access sits behind the [`PortBus`] trait so the handshake
//! logic is testable against a scripted fake.

use std::thread;

use ecfan_error::{EcfanError, Result};

use crate::constants::ec;

/// Raw byte-wide port access. Implemented by [`RawPortBus`] for real
/// hardware and by scripted fakes in tests.
pub trait PortBus {
    fn inb(&mut self, port: u16) -> u8;
    fn outb(&mut self, port: u16, value: u8);
}

/// Port bus backed by x86 `in`/`out` instructions.
///
/// Construction goes through [`RawPortBus::acquire`], which requests
/// access to both EC ports via `ioperm(2)`. Holding a value of this type
/// implies the access grant succeeded.
pub struct RawPortBus {
    _private: (),
}

impl RawPortBus {
    /// Request I/O permission for both EC ports.
    ///
    /// This is the single privilege probe/grant of the daemon: it succeeds
    /// when the process is root or carries CAP_SYS_RAWIO.
    pub fn acquire() -> Result<Self> {
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        {
            // SAFETY: ioperm only manipulates the calling process's I/O
            // permission bitmap; it cannot corrupt memory.
            let data = unsafe { libc::ioperm(ec::DATA_PORT as libc::c_ulong, 1, 1) };
            let sc = unsafe { libc::ioperm(ec::SC_PORT as libc::c_ulong, 1, 1) };
            if data != 0 || sc != 0 {
                return Err(EcfanError::privilege(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
            Ok(Self { _private: () })
        }
        #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
        {
            Err(EcfanError::privilege(
                "raw EC port I/O is only supported on x86_64 Linux",
            ))
        }
    }
}

impl PortBus for RawPortBus {
    #[cfg(target_arch = "x86_64")]
    fn inb(&mut self, port: u16) -> u8 {
        let value: u8;
        // SAFETY: acquire() granted access to this port via ioperm; `in`
        // on a permitted port has no memory effects.
        unsafe {
            std::arch::asm!(
                "in al, dx",
                out("al") value,
                in("dx") port,
                options(nomem, nostack, preserves_flags),
            );
        }
        value
    }

    #[cfg(target_arch = "x86_64")]
    fn outb(&mut self, port: u16, value: u8) {
        // SAFETY: acquire() granted access to this port via ioperm; `out`
        // on a permitted port has no memory effects.
        unsafe {
            std::arch::asm!(
                "out dx, al",
                in("dx") port,
                in("al") value,
                options(nomem, nostack, preserves_flags),
            );
        }
    }

    // Unreachable: acquire() refuses to construct a RawPortBus off x86_64.
    #[cfg(not(target_arch = "x86_64"))]
    fn inb(&mut self, _port: u16) -> u8 {
        0
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn outb(&mut self, _port: u16, _value: u8) {}
}

/// EC transactions over a [`PortBus`]: the IBF/OBF handshake plus the
/// read and write command sequences.
pub struct PortTransport<B: PortBus> {
    bus: B,
}

impl<B: PortBus> PortTransport<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Poll the status port until `bit` reads `value`, for at most
    /// `WAIT_MAX_POLLS` polls spaced `WAIT_POLL_INTERVAL` apart.
    fn wait_flag(&mut self, bit: u8, value: u8) -> Result<()> {
        let mut data = self.bus.inb(ec::SC_PORT);
        let mut polls = 0;
        while (data >> bit) & 0x1 != value {
            if polls >= ec::WAIT_MAX_POLLS {
                return Err(EcfanError::EcTimeout {
                    port: ec::SC_PORT,
                    flag: bit,
                });
            }
            thread::sleep(ec::WAIT_POLL_INTERVAL);
            data = self.bus.inb(ec::SC_PORT);
            polls += 1;
        }
        Ok(())
    }

    /// Read one register: command byte, address byte, then the data byte
    /// once OBF signals it is available.
    pub fn read_register(&mut self, addr: u8) -> Result<u8> {
        self.wait_flag(ec::IBF, 0)?;
        self.bus.outb(ec::SC_PORT, ec::READ_CMD);

        self.wait_flag(ec::IBF, 0)?;
        self.bus.outb(ec::DATA_PORT, addr);

        self.wait_flag(ec::OBF, 1)?;
        Ok(self.bus.inb(ec::DATA_PORT))
    }

    /// Issue a three-byte command/port/value write transaction.
    pub fn write_register(&mut self, cmd: u8, port: u8, value: u8) -> Result<()> {
        self.wait_flag(ec::IBF, 0)?;
        self.bus.outb(ec::SC_PORT, cmd);

        self.wait_flag(ec::IBF, 0)?;
        self.bus.outb(ec::DATA_PORT, port);

        self.wait_flag(ec::IBF, 0)?;
        self.bus.outb(ec::DATA_PORT, value);

        self.wait_flag(ec::IBF, 0)
    }
}
