//! Two-stage shutdown on termination signals.
//!
//! The first Ctrl-C or SIGTERM cancels the stream so pending records are
//! saved. A second one asks for an immediate exit.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Forward Ctrl-C and SIGTERM to `signals` by name until the receiver is dropped
pub async fn forward_signals(signals: mpsc::UnboundedSender<&'static str>) {
    let ctrl_c = {
        let signals = signals.clone();
        async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to install CTRL+C signal handler: {}", e);
                    return;
                }
                if signals.send("Ctrl-C").is_err() {
                    return;
                }
            }
        }
    };

    #[cfg(unix)]
    let terminate = async move {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                while terminate.recv().await.is_some() {
                    if signals.send("SIGTERM").is_err() {
                        return;
                    }
                }
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = async move {
        drop(signals);
    };

    tokio::join!(ctrl_c, terminate);
}

/// Cancel `token` on the first signal received.
///
/// Returns `true` when a second signal arrives before the channel closes,
/// `false` otherwise.
pub async fn escalate(
    token: CancellationToken,
    mut signals: mpsc::UnboundedReceiver<&'static str>,
) -> bool {
    while let Some(name) = signals.recv().await {
        if token.is_cancelled() {
            warn!("Received {} again, terminating immediately", name);
            return true;
        }
        warn!(
            "Received {}. Saving pending records... Press Ctrl-C again to terminate immediately.",
            name
        );
        token.cancel();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_signal_escalates() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = tokio::spawn(escalate(token.clone(), rx));

        tx.send("Ctrl-C").unwrap();
        token.cancelled().await;
        assert!(!watcher.is_finished());

        tx.send("SIGTERM").unwrap();
        assert!(watcher.await.unwrap());
    }

    #[tokio::test]
    async fn test_single_signal_only_cancels() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send("SIGTERM").unwrap();
        drop(tx);

        assert!(!escalate(token.clone(), rx).await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_token_escalates_at_once() {
        let token = CancellationToken::new();
        token.cancel();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send("Ctrl-C").unwrap();

        assert!(escalate(token, rx).await);
    }
}
