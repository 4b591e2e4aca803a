//! Bulk EC register image
//!
//! When the ec_sys kernel module is loaded, the whole 256-byte EC register
//! file is exposed as a debugfs node and one read replaces four port-level
//! handshakes per tick. Anything other than a full-size read is treated as
//! a failure so a truncated image can never masquerade as sensor data.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ecfan_error::{EcfanError, Result};

use crate::constants::ec;

/// Reader for the kernel-exposed EC register image.
#[derive(Debug, Clone)]
pub struct SysfsImage {
    path: PathBuf,
}

impl SysfsImage {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(ec::SYSFS_IMAGE_PATH),
        }
    }

    /// Use a different image path (tests point this at a fixture file).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the image node exists at all.
    pub fn probe(&self) -> bool {
        self.path.exists()
    }

    /// Read the full register file in one syscall.
    pub fn read(&self) -> Result<[u8; ec::REG_SIZE]> {
        let mut file = File::open(&self.path)?;
        let mut buf = [0u8; ec::REG_SIZE];
        let len = file.read(&mut buf)?;
        if len != ec::REG_SIZE {
            return Err(EcfanError::EcShortRead {
                len,
                expected: ec::REG_SIZE,
            });
        }
        Ok(buf)
    }
}

impl Default for SysfsImage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_full_image_read() {
        let mut f = NamedTempFile::new().unwrap();
        let mut data = [0u8; ec::REG_SIZE];
        data[ec::REG_CPU_TEMP as usize] = 52;
        data[ec::REG_GPU_TEMP as usize] = 48;
        f.write_all(&data).unwrap();

        let image = SysfsImage::with_path(f.path());
        assert!(image.probe());
        let buf = image.read().unwrap();
        assert_eq!(buf[ec::REG_CPU_TEMP as usize], 52);
        assert_eq!(buf[ec::REG_GPU_TEMP as usize], 48);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 100]).unwrap();

        let image = SysfsImage::with_path(f.path());
        let err = image.read().unwrap_err();
        assert!(matches!(
            err,
            EcfanError::EcShortRead { len: 100, expected } if expected == ec::REG_SIZE
        ));
    }

    #[test]
    fn test_missing_node() {
        let image = SysfsImage::with_path("/nonexistent/ec/io");
        assert!(!image.probe());
        assert!(matches!(image.read().unwrap_err(), EcfanError::Io(_)));
    }
}
