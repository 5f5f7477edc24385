//! Terminal progress indicator shown while waiting on the scheduler.

use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const FRAMES: [char; 4] = ['|', '/', '-', '\\'];

/// A spinner drawn on a background thread.
///
/// The thread shares nothing with the caller beyond a running flag, so the
/// indicator never delays polling. Stopping (or dropping) the indicator
/// clears the line and joins the thread.
#[derive(Debug)]
pub struct ProgressIndicator {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressIndicator {
    /// Starts drawing `message` on standard error, or draws nothing when
    /// standard error is not a terminal.
    #[must_use]
    pub fn start(message: impl Into<String>, tick: Duration) -> Self {
        Self::on_stderr(std::io::stderr().is_terminal(), message, tick)
    }

    fn on_stderr(is_terminal: bool, message: impl Into<String>, tick: Duration) -> Self {
        if is_terminal {
            Self::start_with_writer(message, tick, Box::new(std::io::stderr()))
        } else {
            Self::disabled()
        }
    }

    /// Starts drawing `message` on `writer`.
    #[must_use]
    pub fn start_with_writer(
        message: impl Into<String>,
        tick: Duration,
        mut writer: Box<dyn Write + Send>,
    ) -> Self {
        let message = message.into();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::spawn(move || {
            let mut frame = 0;
            while flag.load(Ordering::SeqCst) {
                // Write errors only mean the terminal went away.
                let _ = write!(writer, "\r{message} {}", FRAMES[frame % FRAMES.len()]);
                let _ = writer.flush();
                frame += 1;
                thread::sleep(tick);
            }
            let _ = write!(writer, "\r\x1b[2K");
            let _ = writer.flush();
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// An indicator that draws nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Returns true while the drawing thread is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// Stops drawing and waits for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressIndicator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_draws_frames_until_stopped() {
        let buffer = SharedBuffer::default();
        let mut indicator = ProgressIndicator::start_with_writer(
            "Waiting for job 42",
            Duration::from_millis(5),
            Box::new(buffer.clone()),
        );
        assert!(indicator.is_running());
        thread::sleep(Duration::from_millis(40));
        indicator.stop();
        assert!(!indicator.is_running());

        let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert!(text.contains("Waiting for job 42 |"));
        assert!(text.ends_with("\r\x1b[2K"));

        let len = buffer.0.lock().len();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(buffer.0.lock().len(), len);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut indicator = ProgressIndicator::start_with_writer(
            "x",
            Duration::from_millis(1),
            Box::new(SharedBuffer::default()),
        );
        indicator.stop();
        indicator.stop();
        assert!(!indicator.is_running());
    }

    #[test]
    fn test_redirected_stderr_draws_nothing() {
        let mut indicator = ProgressIndicator::on_stderr(false, "Waiting", Duration::from_millis(1));
        assert!(!indicator.is_running());
        indicator.stop();
    }

    #[test]
    fn test_disabled_never_runs() {
        let mut indicator = ProgressIndicator::disabled();
        assert!(!indicator.is_running());
        indicator.stop();
    }
}
