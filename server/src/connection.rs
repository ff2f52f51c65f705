//! Transport abstraction owned by each player.

use std::io;

/// A player's transport handle as seen by the registries.
///
/// The TCP implementation lives in the network module; tests use an
/// in-memory recorder.
pub trait Connection {
    /// Hands one encoded frame to the transport.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Closes the transport. Calling it again does nothing.
    fn close(&mut self);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Connection;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct Recorded {
        sent: String,
        closes: usize,
        writes_left: Option<usize>,
    }

    /// Records everything sent; clones share the same record so a test can
    /// keep one after handing the other to a registry.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingConnection {
        inner: Rc<RefCell<Recorded>>,
    }

    impl RecordingConnection {
        pub fn new() -> Self {
            Self::default()
        }

        /// Frames sent since the last call, delimiter stripped.
        pub fn take_frames(&self) -> Vec<String> {
            let sent = std::mem::take(&mut self.inner.borrow_mut().sent);
            sent.split('+')
                .filter(|frame| !frame.is_empty())
                .map(str::to_string)
                .collect()
        }

        pub fn close_count(&self) -> usize {
            self.inner.borrow().closes
        }

        /// Lets `count` more writes succeed, then fails every write.
        pub fn fail_after(&self, count: usize) {
            self.inner.borrow_mut().writes_left = Some(count);
        }

        pub fn heal(&self) {
            self.inner.borrow_mut().writes_left = None;
        }
    }

    impl Connection for RecordingConnection {
        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            let mut inner = self.inner.borrow_mut();
            if let Some(left) = inner.writes_left.as_mut() {
                if *left == 0 {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
                }
                *left -= 1;
            }
            inner.sent.push_str(&String::from_utf8_lossy(frame));
            Ok(())
        }

        fn close(&mut self) {
            self.inner.borrow_mut().closes += 1;
        }
    }
}
