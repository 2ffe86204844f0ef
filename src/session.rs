//! Session facade: options, backend factory and the public capture
//! surface.
//!
//! The backend is a closed variant chosen at compile time per OS and,
//! on GNU/Linux, at runtime per the `backend` option; dispatch is
//! exhaustive. One mutex per session serialises `grab` and `monitors`,
//! so two threads sharing a session observe strictly ordered captures
//! while independent sessions capture concurrently.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use log::debug;

use crate::capture::{merge_cursor, CaptureBackend};
use crate::error::{Result, ScreenCaptureError};
use crate::monitor::{Monitor, MonitorList};
use crate::png;
use crate::save::{SaveIter, SaveOptions, SaveOutput};
use crate::screenshot::Screenshot;

#[cfg(target_os = "linux")]
use crate::capture::{xcb::XGetImageBackend, xlib::XlibBackend, xshm::XShmBackend};

#[cfg(target_os = "macos")]
use crate::capture::quartz::QuartzBackend;

#[cfg(target_os = "windows")]
use crate::capture::gdi::GdiBackend;

/// Platform backend selector; only meaningful on GNU/Linux, where the
/// X transport can be chosen explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// The platform default: XCB + MIT-SHM with automatic fallback on
    /// GNU/Linux, Quartz on macOS, GDI on Windows.
    #[default]
    Default,
    /// XCB with XShmGetImage (GNU/Linux).
    XShmGetImage,
    /// XCB with XGetImage (GNU/Linux).
    XGetImage,
    /// Legacy Xlib (GNU/Linux).
    Xlib,
}

impl FromStr for BackendKind {
    type Err = ScreenCaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "xshmgetimage" => Ok(Self::XShmGetImage),
            "xgetimage" => Ok(Self::XGetImage),
            "xlib" => Ok(Self::Xlib),
            other => Err(ScreenCaptureError::invalid_argument(format!(
                "unknown backend {other:?}"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::XShmGetImage => "xshmgetimage",
            Self::XGetImage => "xgetimage",
            Self::Xlib => "xlib",
        })
    }
}

/// Configuration for [`Session::open`].
///
/// Options that only apply to one platform are accepted everywhere and
/// silently ignored elsewhere, so cross-platform callers can pass one
/// configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    compression_level: u32,
    display: Option<String>,
    max_displays: usize,
    with_cursor: bool,
    backend: BackendKind,
    image_options: Option<u32>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            compression_level: png::DEFAULT_COMPRESSION_LEVEL,
            display: None,
            max_displays: 32,
            with_cursor: false,
            backend: BackendKind::Default,
            image_options: None,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// PNG compression level used when saving, 0..=9 (default 6).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// X display name, e.g. `":0.0"` (GNU/Linux only). Defaults to the
    /// `DISPLAY` environment variable.
    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Maximum number of physical displays to enumerate (macOS only,
    /// default 32).
    pub fn max_displays(mut self, max_displays: usize) -> Self {
        self.max_displays = max_displays;
        self
    }

    /// Composite the mouse cursor into captures where the platform
    /// supports it; a documented no-op elsewhere (default false).
    pub fn with_cursor(mut self, with_cursor: bool) -> Self {
        self.with_cursor = with_cursor;
        self
    }

    /// Capture backend (GNU/Linux only).
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Raw CGWindowList image options (macOS only); pass 0 to force
    /// scaled (Retina) capture instead of the nominal-resolution
    /// default.
    pub fn image_options(mut self, image_options: u32) -> Self {
        self.image_options = Some(image_options);
        self
    }
}

/// Closed set of backend implementations for the host OS.
enum Backend {
    #[cfg(target_os = "linux")]
    XShm(XShmBackend),
    #[cfg(target_os = "linux")]
    XGetImage(XGetImageBackend),
    #[cfg(target_os = "linux")]
    Xlib(XlibBackend),
    #[cfg(target_os = "macos")]
    Quartz(QuartzBackend),
    #[cfg(target_os = "windows")]
    Gdi(GdiBackend),
    #[cfg(test)]
    Fake(fake::FakeBackend),
}

impl CaptureBackend for Backend {
    fn monitors(&mut self) -> Result<MonitorList> {
        match self {
            #[cfg(target_os = "linux")]
            Backend::XShm(b) => b.monitors(),
            #[cfg(target_os = "linux")]
            Backend::XGetImage(b) => b.monitors(),
            #[cfg(target_os = "linux")]
            Backend::Xlib(b) => b.monitors(),
            #[cfg(target_os = "macos")]
            Backend::Quartz(b) => b.monitors(),
            #[cfg(target_os = "windows")]
            Backend::Gdi(b) => b.monitors(),
            #[cfg(test)]
            Backend::Fake(b) => b.monitors(),
        }
    }

    fn grab(&mut self, region: &Monitor) -> Result<Screenshot> {
        match self {
            #[cfg(target_os = "linux")]
            Backend::XShm(b) => b.grab(region),
            #[cfg(target_os = "linux")]
            Backend::XGetImage(b) => b.grab(region),
            #[cfg(target_os = "linux")]
            Backend::Xlib(b) => b.grab(region),
            #[cfg(target_os = "macos")]
            Backend::Quartz(b) => b.grab(region),
            #[cfg(target_os = "windows")]
            Backend::Gdi(b) => b.grab(region),
            #[cfg(test)]
            Backend::Fake(b) => b.grab(region),
        }
    }

    fn cursor(&mut self) -> Result<Option<Screenshot>> {
        match self {
            #[cfg(target_os = "linux")]
            Backend::XShm(b) => b.cursor(),
            #[cfg(target_os = "linux")]
            Backend::XGetImage(b) => b.cursor(),
            #[cfg(target_os = "linux")]
            Backend::Xlib(b) => b.cursor(),
            #[cfg(target_os = "macos")]
            Backend::Quartz(b) => b.cursor(),
            #[cfg(target_os = "windows")]
            Backend::Gdi(b) => b.cursor(),
            #[cfg(test)]
            Backend::Fake(b) => b.cursor(),
        }
    }

    fn close(&mut self) {
        match self {
            #[cfg(target_os = "linux")]
            Backend::XShm(b) => b.close(),
            #[cfg(target_os = "linux")]
            Backend::XGetImage(b) => b.close(),
            #[cfg(target_os = "linux")]
            Backend::Xlib(b) => b.close(),
            #[cfg(target_os = "macos")]
            Backend::Quartz(b) => b.close(),
            #[cfg(target_os = "windows")]
            Backend::Gdi(b) => b.close(),
            #[cfg(test)]
            Backend::Fake(b) => b.close(),
        }
    }
}

#[cfg(target_os = "linux")]
fn open_backend(options: &SessionOptions) -> Result<Backend> {
    let display = options.display.as_deref();
    Ok(match options.backend {
        BackendKind::Default | BackendKind::XShmGetImage => {
            Backend::XShm(XShmBackend::open(display, options.with_cursor)?)
        }
        BackendKind::XGetImage => {
            Backend::XGetImage(XGetImageBackend::open(display, options.with_cursor)?)
        }
        BackendKind::Xlib => Backend::Xlib(XlibBackend::open(display, options.with_cursor)?),
    })
}

#[cfg(not(target_os = "linux"))]
fn open_backend(options: &SessionOptions) -> Result<Backend> {
    if options.backend != BackendKind::Default {
        return Err(ScreenCaptureError::invalid_argument(
            "the only valid backend on this platform is \"default\"",
        ));
    }

    #[cfg(target_os = "macos")]
    {
        return Ok(Backend::Quartz(QuartzBackend::open(
            options.max_displays,
            options.with_cursor,
            options.image_options,
        )?));
    }

    #[cfg(target_os = "windows")]
    {
        return Ok(Backend::Gdi(GdiBackend::open(options.with_cursor)?));
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    Err(ScreenCaptureError::display_unavailable(format!(
        "platform {:?} not supported",
        std::env::consts::OS
    )))
}

struct Inner {
    backend: Option<Backend>,
    monitors: Option<MonitorList>,
    with_cursor: bool,
}

impl Inner {
    fn backend(&mut self) -> Result<&mut Backend> {
        self.backend
            .as_mut()
            .ok_or_else(ScreenCaptureError::session_closed)
    }

    /// The monitor list is computed lazily on first query and frozen
    /// for the session lifetime.
    fn monitor_list(&mut self) -> Result<&MonitorList> {
        if self.monitors.is_none() {
            let list = self.backend()?.monitors()?;
            self.monitors = Some(list);
        }
        Ok(self.monitors.as_ref().expect("monitor list just cached"))
    }

    fn grab(&mut self, region: &Monitor) -> Result<Screenshot> {
        let with_cursor = self.with_cursor;
        let backend = self.backend()?;
        let mut shot = backend.grab(region)?;
        if with_cursor {
            if let Some(cursor) = backend.cursor()? {
                merge_cursor(&mut shot, &cursor);
            }
        }
        Ok(shot)
    }
}

/// One capture session: owns the native handles and the monitor list.
///
/// Dropping the session closes it; [`Session::close`] may also be
/// called explicitly, any number of times.
pub struct Session {
    inner: Mutex<Inner>,
    compression_level: u32,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

impl Session {
    /// Open a session for the host platform.
    pub fn open(options: SessionOptions) -> Result<Self> {
        png::validate_level(options.compression_level)?;
        let backend = open_backend(&options)?;
        debug!("session opened with backend {:?}", options.backend);
        Ok(Self {
            inner: Mutex::new(Inner {
                backend: Some(backend),
                monitors: None,
                with_cursor: options.with_cursor,
            }),
            compression_level: options.compression_level,
        })
    }

    /// Open a session with default options.
    pub fn open_default() -> Result<Self> {
        Self::open(SessionOptions::default())
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    /// The session's monitor list: the virtual monitor at index 0,
    /// physical monitors in OS order from index 1.
    pub fn monitors(&self) -> Result<Vec<Monitor>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.monitor_list()?.monitors().to_vec())
    }

    /// The OS-designated primary monitor, or the first physical one
    /// when the platform does not mark a primary. `None` without any
    /// physical monitor.
    pub fn primary_monitor(&self) -> Result<Option<Monitor>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.monitor_list()?.primary().copied())
    }

    /// Capture an arbitrary rectangle in global screen coordinates.
    pub fn grab(&self, region: &Monitor) -> Result<Screenshot> {
        let mut inner = self.inner.lock().unwrap();
        inner.grab(region)
    }

    /// Capture monitor `index` as reported by [`monitors`](Self::monitors);
    /// index 0 is the virtual monitor.
    pub fn grab_monitor(&self, index: usize) -> Result<Screenshot> {
        let mut inner = self.inner.lock().unwrap();
        let monitor = *inner.monitor_list()?.get(index).ok_or_else(|| {
            ScreenCaptureError::invalid_argument(format!("monitor {index} does not exist"))
        })?;
        inner.grab(&monitor)
    }

    /// Capture and encode per [`SaveOptions`], yielding one result per
    /// produced file (or in-memory PNG in no-file mode).
    pub fn save(&self, options: SaveOptions) -> Result<SaveIter<'_>> {
        SaveIter::plan(self, options)
    }

    /// Convenience wrapper: save the first physical monitor with the
    /// default template and return the created path.
    pub fn shot(&self) -> Result<std::path::PathBuf> {
        let mut iter = self.save(SaveOptions::new().monitor(1))?;
        match iter.next() {
            Some(Ok(SaveOutput::File(path))) => Ok(path),
            Some(Ok(SaveOutput::Bytes(_))) => unreachable!("default template writes files"),
            Some(Err(err)) => Err(err),
            None => Err(ScreenCaptureError::invalid_argument("no monitor found")),
        }
    }

    /// Release every native handle. Idempotent; further captures fail
    /// with `session-closed`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut backend) = inner.backend.take() {
            backend.close();
        }
    }
}

#[cfg(target_os = "linux")]
impl Session {
    /// MIT-SHM availability, when the session runs on the default
    /// (XShmGetImage) backend.
    pub fn shm_status(&self) -> Option<crate::capture::xshm::ShmStatus> {
        let inner = self.inner.lock().unwrap();
        match inner.backend.as_ref() {
            Some(Backend::XShm(b)) => Some(b.shm_status()),
            _ => None,
        }
    }

    /// Why the default backend stopped using MIT-SHM, when it did.
    pub fn shm_fallback_reason(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        match inner.backend.as_ref() {
            Some(Backend::XShm(b)) => b.shm_fallback_reason().map(str::to_owned),
            _ => None,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
