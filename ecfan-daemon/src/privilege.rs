//! EC port privilege acquisition
//!
//! One probe/grant call: ask the kernel for raw I/O access to the two EC
//! ports. If it fails, the operator gets concrete instructions instead of
//! a bare errno.

use tracing::info;

use ecfan_core::ec::port::RawPortBus;
use ecfan_error::Result;

/// Acquire the capability to perform raw I/O on the EC ports.
pub fn acquire_ec_access() -> Result<RawPortBus> {
    match RawPortBus::acquire() {
        Ok(bus) => {
            info!("EC port access granted");
            Ok(bus)
        }
        Err(e) => {
            print_privilege_help();
            Err(e)
        }
    }
}

fn print_privilege_help() {
    eprintln!("Privilege acquisition failed. Try one of these methods:");
    eprintln!();
    eprintln!("1. Capabilities (recommended):");
    eprintln!("   sudo setcap cap_sys_rawio+ep $(command -v ecfand)");
    eprintln!();
    eprintln!("2. Root service unit (systemd or similar):");
    eprintln!("   run ecfand as root from your init system");
    eprintln!();
    eprintln!("3. Traditional setuid:");
    eprintln!("   sudo chown root $(command -v ecfand)");
    eprintln!("   sudo chmod u+s $(command -v ecfand)");
}
