use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Raise the stop flag. Returns `true` only for the first request.
///
/// Works whether or not anyone is still listening.
pub fn request_stop(stop: &watch::Sender<bool>) -> bool {
    stop.send_if_modified(|requested| {
        if *requested {
            false
        } else {
            *requested = true;
            true
        }
    })
}

/// Raise the stop flag on SIGINT or SIGTERM. Later signals are logged and ignored.
pub fn spawn_shutdown_listener(stop: Arc<watch::Sender<bool>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match ShutdownSignals::new() {
            Ok(signals) => signals,
            Err(error) => {
                warn!(%error, "could not install signal handlers");
                return;
            }
        };

        loop {
            let signal = match signals.next().await {
                Ok(signal) => signal,
                Err(error) => {
                    warn!(%error, "signal handler failed");
                    return;
                }
            };
            if request_stop(&stop) {
                info!(signal, "shutdown requested, finishing in-flight jobs");
            } else {
                warn!(signal, "shutdown already in progress, ignoring signal");
            }
        }
    })
}

struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn next(&mut self) -> io::Result<&'static str> {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted.map(|_| "SIGINT"),
            Some(()) = self.terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_repeated_requests_when_request_stop_should_only_report_first() {
        let (tx, rx) = watch::channel(false);

        assert!(request_stop(&tx));
        assert!(!request_stop(&tx));
        assert!(*rx.borrow());
    }

    #[test]
    fn given_no_listeners_when_request_stop_should_still_record_it() {
        let (tx, rx) = watch::channel(false);
        drop(rx);

        assert!(request_stop(&tx));
        assert!(*tx.borrow());
    }
}
