//! Byte-stream transport boundary.

use crate::error::LinkError;

/// A point-to-point byte stream the session writes to and polls from.
///
/// Methods take `&self`: the drive loop writes while the inbound reader polls,
/// so an implementation must keep its read and write paths independent.
pub trait Transport: Send + Sync {
    /// Write the whole buffer; returns the number of bytes written.
    fn write(&self, bytes: &[u8]) -> Result<usize, LinkError>;
    /// Non-blocking read of whatever is currently available (possibly nothing).
    fn read_available(&self) -> Result<Vec<u8>, LinkError>;
    fn is_open(&self) -> bool;
    fn close(&self) {}
}
