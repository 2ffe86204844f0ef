//! Save orchestration: monitor selection, filename templates and the
//! lazy capture-encode-write sequence.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use log::warn;

use crate::error::{Result, ScreenCaptureError};
use crate::monitor::Monitor;
use crate::png;
use crate::session::Session;

/// Default output template.
pub const DEFAULT_TEMPLATE: &str = "monitor-{mon}.png";

/// Default `{date}` formatting, chosen to be filesystem-safe.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Pre-write notification: receives each resolved path before the file
/// is created. The return value is intentionally `()`; refusing a
/// write means renaming or removing the target from the callback.
pub type SaveCallback = Box<dyn FnMut(&Path) + Send>;

/// One item produced by [`SaveIter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutput {
    /// The path of a file that was written.
    File(PathBuf),
    /// A complete in-memory PNG (no-file mode: empty template).
    Bytes(Vec<u8>),
}

/// Configuration for [`Session::save`].
pub struct SaveOptions {
    monitor: i32,
    output: String,
    date_format: String,
    callback: Option<SaveCallback>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            monitor: 0,
            output: DEFAULT_TEMPLATE.to_owned(),
            date_format: DEFAULT_DATE_FORMAT.to_owned(),
            callback: None,
        }
    }
}

impl fmt::Debug for SaveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveOptions")
            .field("monitor", &self.monitor)
            .field("output", &self.output)
            .field("date_format", &self.date_format)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor selector: `-1` captures the virtual monitor once, `0`
    /// iterates every physical monitor, positive `N` captures monitor
    /// `N` (default 0).
    pub fn monitor(mut self, monitor: i32) -> Self {
        self.monitor = monitor;
        self
    }

    /// Output template; recognises `{mon}`, `{top}`, `{left}`,
    /// `{width}`, `{height}` and `{date}`. An empty template selects
    /// no-file mode and the iterator yields PNG bytes instead.
    pub fn output(mut self, template: impl Into<String>) -> Self {
        self.output = template.into();
        self
    }

    /// strftime-style format for the `{date}` placeholder.
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    /// Install the pre-write callback.
    pub fn callback(mut self, callback: impl FnMut(&Path) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Instantiate an output template for one capture: substitutes
/// `{mon}`, `{top}`, `{left}`, `{width}`, `{height}` and `{date}`.
pub fn resolve_template(template: &str, mon: usize, monitor: &Monitor, date_format: &str) -> String {
    let mut resolved = template
        .replace("{mon}", &mon.to_string())
        .replace("{top}", &monitor.top.to_string())
        .replace("{left}", &monitor.left.to_string())
        .replace("{width}", &monitor.width.to_string())
        .replace("{height}", &monitor.height.to_string());
    if resolved.contains("{date}") {
        let date = Local::now().format(date_format).to_string();
        resolved = resolved.replace("{date}", &date);
    }
    resolved
}

/// Lazy, single-pass sequence of capture results.
///
/// A failure on one monitor does not abort the remaining ones unless
/// its kind is terminal for the whole session.
pub struct SaveIter<'a> {
    session: &'a Session,
    output: String,
    date_format: String,
    callback: Option<SaveCallback>,
    targets: std::vec::IntoIter<(usize, Monitor)>,
    done: bool,
}

impl fmt::Debug for SaveIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveIter")
            .field("output", &self.output)
            .field("date_format", &self.date_format)
            .field("done", &self.done)
            .finish()
    }
}

impl<'a> SaveIter<'a> {
    pub(crate) fn plan(session: &'a Session, options: SaveOptions) -> Result<Self> {
        let monitors = session.monitors()?;
        if monitors.len() <= 1 {
            return Err(ScreenCaptureError::display_unavailable("no monitor found"));
        }

        // Reject an unusable {date} format up front rather than at the
        // first capture.
        if options.output.contains("{date}")
            && StrftimeItems::new(&options.date_format)
                .any(|item| matches!(item, Item::Error))
        {
            return Err(ScreenCaptureError::invalid_argument(format!(
                "bad date format {:?}",
                options.date_format
            )));
        }

        let targets: Vec<(usize, Monitor)> = match options.monitor {
            0 => monitors.iter().copied().enumerate().skip(1).collect(),
            -1 => vec![(0, monitors[0])],
            n if n > 0 => {
                let idx = n as usize;
                let monitor = *monitors.get(idx).ok_or_else(|| {
                    ScreenCaptureError::invalid_argument(format!("monitor {n} does not exist"))
                })?;
                vec![(idx, monitor)]
            }
            n => {
                return Err(ScreenCaptureError::invalid_argument(format!(
                    "bad monitor selector {n}"
                )))
            }
        };

        Ok(Self {
            session,
            output: options.output,
            date_format: options.date_format,
            callback: options.callback,
            targets: targets.into_iter(),
            done: false,
        })
    }

    fn produce(&mut self, index: usize, monitor: &Monitor) -> Result<SaveOutput> {
        let level = self.session.compression_level();

        if self.output.is_empty() {
            let shot = self.session.grab(monitor)?;
            let bytes = png::to_png(shot.raw(), (shot.width(), shot.height()), level)?;
            return Ok(SaveOutput::Bytes(bytes));
        }

        let path = PathBuf::from(resolve_template(
            &self.output,
            index,
            monitor,
            &self.date_format,
        ));
        if let Some(callback) = self.callback.as_mut() {
            callback(&path);
        }

        let shot = self.session.grab(monitor)?;
        let file = File::create(&path).map_err(|e| {
            ScreenCaptureError::encoder(format!("cannot create {}: {e}", path.display()))
        })?;
        let mut writer = BufWriter::new(file);
        png::write_png(&mut writer, shot.raw(), (shot.width(), shot.height()), level)?;

        Ok(SaveOutput::File(path))
    }
}

impl Iterator for SaveIter<'_> {
    type Item = Result<SaveOutput>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (index, monitor) = self.targets.next()?;
        match self.produce(index, &monitor) {
            Ok(output) => Some(Ok(output)),
            Err(err) => {
                if err.kind().is_terminal() {
                    self.done = true;
                } else {
                    warn!("capture of monitor {index} failed, continuing: {err}");
                }
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::fake::FakeBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn two_monitor_session() -> Session {
        Session::with_fake(
            vec![
                Monitor::new(0, 0, 32, 16),
                Monitor::new(32, 0, 24, 12),
            ],
            6,
        )
    }

    fn temp_template(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("sct-save-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("shot-{mon}-{width}x{height}.png")
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn template_resolution_substitutes_every_placeholder() {
        let monitor = Monitor::new(0, 0, 1920, 1080);
        let resolved = resolve_template(
            "sct-{mon}-{width}x{height}.png",
            1,
            &monitor,
            DEFAULT_DATE_FORMAT,
        );
        assert_eq!(resolved, "sct-1-1920x1080.png");

        let monitor = Monitor::new(-5, 7, 10, 20);
        let resolved = resolve_template("{top}x{left}_{width}x{height}", 3, &monitor, "%Y");
        assert_eq!(resolved, "7x-5_10x20");
    }

    #[test]
    fn date_placeholder_uses_the_given_format() {
        let monitor = Monitor::new(0, 0, 1, 1);
        let year = Local::now().format("%Y").to_string();
        let resolved = resolve_template("shot-{date}.png", 0, &monitor, "%Y");
        assert_eq!(resolved, format!("shot-{year}.png"));
    }

    #[test]
    fn each_monitor_selector_writes_one_file_per_monitor() {
        let session = two_monitor_session();
        let template = temp_template("each");

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_callback = Arc::clone(&seen);
        let iter = session
            .save(
                SaveOptions::new()
                    .monitor(0)
                    .output(template)
                    .callback(move |path| {
                        // Pre-write: the target must not exist yet.
                        assert!(!path.exists(), "{} written before callback", path.display());
                        seen_in_callback.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();

        let outputs: Vec<_> = iter.collect::<Result<_>>().unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        for output in outputs {
            match output {
                SaveOutput::File(path) => {
                    assert!(path.exists());
                    let bytes = std::fs::read(&path).unwrap();
                    assert_eq!(&bytes[..8], &[137, 80, 78, 71, 13, 10, 26, 10]);
                    std::fs::remove_file(path).unwrap();
                }
                SaveOutput::Bytes(_) => panic!("expected files"),
            }
        }
    }

    #[test]
    fn virtual_selector_produces_one_combined_capture() {
        let session = two_monitor_session();
        let outputs: Vec<_> = session
            .save(SaveOptions::new().monitor(-1).output(""))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            SaveOutput::Bytes(bytes) => {
                assert_eq!(&bytes[..8], &[137, 80, 78, 71, 13, 10, 26, 10]);
                // IHDR width = virtual monitor width (56).
                assert_eq!(&bytes[16..20], &56u32.to_be_bytes());
            }
            SaveOutput::File(_) => panic!("expected bytes in no-file mode"),
        }
    }

    #[test]
    fn positive_selector_targets_one_monitor() {
        let session = two_monitor_session();
        let outputs: Vec<_> = session
            .save(SaveOptions::new().monitor(2).output(""))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(outputs.len(), 1);

        let err = session
            .save(SaveOptions::new().monitor(9).output(""))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = session
            .save(SaveOptions::new().monitor(-2).output(""))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn failure_on_one_monitor_does_not_abort_the_rest() {
        let session = Session::with_fake_backend(
            FakeBackend {
                physical: vec![Monitor::new(0, 0, 32, 16), Monitor::new(32, 0, 24, 12)],
                fail_on: Some(Monitor::new(0, 0, 32, 16)),
            },
            6,
        );
        let results: Vec<_> = session
            .save(SaveOptions::new().monitor(0).output(""))
            .unwrap()
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            ErrorKind::NativeCallFailed
        );
        assert!(results[1].is_ok());
    }

    #[test]
    fn bad_date_format_is_rejected_up_front() {
        let session = two_monitor_session();
        let err = session
            .save(
                SaveOptions::new()
                    .output("shot-{date}.png")
                    .date_format("%Q%Q"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
