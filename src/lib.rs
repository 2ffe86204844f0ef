//! sct - multi-monitor screenshot capture
//!
//! Captures raster screenshots of physical displays through the native
//! readback primitives of each platform (XCB with an MIT-SHM fast
//! path, legacy Xlib, Quartz, GDI) and encodes them as PNG without any
//! imaging dependency.
//!
//! ```no_run
//! use sct::{Session, SessionOptions};
//!
//! let session = Session::open(SessionOptions::new().with_cursor(true))?;
//! for monitor in session.monitors()? {
//!     println!("{monitor:?}");
//! }
//! let shot = session.grab_monitor(1)?;
//! let png = sct::to_png(shot.raw(), (shot.width(), shot.height()), 6)?;
//! # Ok::<(), sct::ScreenCaptureError>(())
//! ```

// Platform capture backends
mod capture;

// Structured errors
pub mod error;

// Logging bootstrap for the CLI
pub mod logging;

// Monitor geometry and the virtual-monitor model
pub mod monitor;

// Pure PNG encoder
pub mod png;

// Save orchestration and filename templates
pub mod save;

// The screenshot value object
pub mod screenshot;

// Session facade and backend factory
pub mod session;

// Re-export commonly used types
pub use error::{ErrorKind, Result, ScreenCaptureError};
pub use monitor::{virtual_monitor, Monitor, MonitorList};
pub use png::{to_png, write_png, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
pub use save::{SaveIter, SaveOptions, SaveOutput, DEFAULT_DATE_FORMAT, DEFAULT_TEMPLATE};
pub use screenshot::{ArrayInterface, Pos, Screenshot, Size};
pub use session::{BackendKind, Session, SessionOptions};

#[cfg(target_os = "linux")]
pub use capture::xshm::ShmStatus;
