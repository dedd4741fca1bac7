use thiserror::Error;

use crate::device::DeviceError;
use crate::export::ExportError;

/// Where a failure happened decides how it is handled: only a startup
/// failure ends the program.
#[derive(Debug, Error)]
pub enum Fault {
    /// No device found or opened; the session never starts
    #[error("startup failed: {0}")]
    Startup(DeviceError),

    /// One acquisition tick failed; the previous frame stays published
    #[error("{0}")]
    Read(DeviceError),

    /// Writing an export failed; acquisition is unaffected
    #[error("{0}")]
    Export(ExportError),

    /// Device close failed during teardown; swallowed
    #[error("device close failed: {0}")]
    Shutdown(DeviceError),
}

impl Fault {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::Startup(_))
    }

    /// Log at the level this kind of fault warrants
    pub fn log(&self) {
        match self {
            Fault::Startup(e) => tracing::error!("[Main] ❌ Startup fault: {}", e),
            Fault::Read(e) => tracing::warn!("[Acquire] Read fault, tick abandoned: {}", e),
            Fault::Export(e) => tracing::error!("[Export] ❌ Export fault: {}", e),
            Fault::Shutdown(e) => tracing::warn!("[Main] Shutdown fault ignored: {}", e),
        }
    }
}
