//! Resize notifications from the window to the frame loop.
//!
//! The window pushes every reported size. The loop only cares whether a
//! resize happened since the last frame and what the final size was, so
//! [`ResizeListener::take_latest`] drains and coalesces.

use crossbeam_channel::{Receiver, Sender};

/// Sending half, owned by the window.
#[derive(Clone, Debug)]
pub struct ResizeNotifier {
    tx: Sender<(u32, u32)>,
}

impl ResizeNotifier {
    /// Queues a resize. A disconnected listener is ignored.
    pub fn notify(&self, width: u32, height: u32) {
        if self.tx.send((width, height)).is_err() {
            tracing::trace!("Resize listener dropped, ignoring {}x{}", width, height);
        }
    }
}

/// Receiving half, owned by the frame loop.
#[derive(Debug)]
pub struct ResizeListener {
    rx: Receiver<(u32, u32)>,
}

impl ResizeListener {
    /// Drains pending notifications and returns the most recent size.
    pub fn take_latest(&self) -> Option<(u32, u32)> {
        self.rx.try_iter().last()
    }

    /// Drains pending notifications, reporting whether there were any.
    pub fn take_pending(&self) -> bool {
        self.take_latest().is_some()
    }
}

/// Creates a connected notifier/listener pair.
pub fn resize_channel() -> (ResizeNotifier, ResizeListener) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ResizeNotifier { tx }, ResizeListener { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_channel_has_no_resize() {
        let (_notifier, listener) = resize_channel();
        assert_eq!(listener.take_latest(), None);
        assert!(!listener.take_pending());
    }

    #[test]
    fn test_take_latest_coalesces() {
        let (notifier, listener) = resize_channel();
        notifier.notify(800, 600);
        notifier.notify(0, 0);
        notifier.notify(1024, 768);

        assert_eq!(listener.take_latest(), Some((1024, 768)));
        // Drained.
        assert_eq!(listener.take_latest(), None);
    }

    #[test]
    fn test_notify_after_listener_dropped() {
        let (notifier, listener) = resize_channel();
        drop(listener);
        notifier.notify(640, 480);
    }

    #[test]
    fn test_cloned_notifier_feeds_same_listener() {
        let (notifier, listener) = resize_channel();
        let other = notifier.clone();
        notifier.notify(1, 1);
        other.notify(2, 2);
        assert_eq!(listener.take_latest(), Some((2, 2)));
    }
}
