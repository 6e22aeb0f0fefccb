use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use tracing::debug;

/// Create a connected handle/listener pair for a key-driven signal.
pub fn signal_channel() -> (SignalHandle, SignalListener) {
    let (tx, rx) = unbounded();
    (SignalHandle { tx }, SignalListener { rx })
}

/// Abort requests for the running trial.
pub fn abort_channel() -> (AbortHandle, AbortListener) {
    signal_channel()
}

/// Handle for quit keys and close requests.
pub type AbortHandle = SignalHandle;
pub type AbortListener = SignalListener;

/// Raises a signal. Cheap to clone; hand one to whatever watches the keys.
#[derive(Debug, Clone)]
pub struct SignalHandle {
    tx: Sender<()>,
}

impl SignalHandle {
    pub fn request(&self) {
        if self.tx.send(()).is_err() {
            debug!("signal raised with no listener");
        }
    }
}

/// Receiving side. Never blocks.
#[derive(Debug)]
pub struct SignalListener {
    rx: Receiver<()>,
}

impl SignalListener {
    /// Consume every pending request; `true` if there was at least one.
    pub fn poll(&self) -> bool {
        let mut requested = false;
        loop {
            match self.rx.try_recv() {
                Ok(()) => requested = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return requested,
            }
        }
    }

    /// Drop stale requests, e.g. a quit key pressed between trials.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_is_non_blocking_and_consumes() {
        let (handle, listener) = abort_channel();
        assert!(!listener.poll());
        handle.request();
        handle.clone().request();
        assert!(listener.poll());
        assert!(!listener.poll());
    }

    #[test]
    fn requests_from_another_thread_arrive() {
        let (handle, listener) = abort_channel();
        std::thread::spawn(move || handle.request()).join().unwrap();
        assert!(listener.poll());
    }

    #[test]
    fn clear_drops_pending() {
        let (handle, listener) = abort_channel();
        handle.request();
        assert_eq!(listener.clear(), 1);
        assert!(!listener.poll());
    }

    #[test]
    fn dropped_handle_means_no_abort() {
        let (handle, listener) = abort_channel();
        drop(handle);
        assert!(!listener.poll());
    }
}
