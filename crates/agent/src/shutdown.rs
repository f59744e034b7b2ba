use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    Graceful,
    Immediate,
}

/// Tracks how many termination signals have been received so a second
/// Ctrl+C/SIGTERM escalates to an immediate exit.
pub struct ShutdownController {
    forced: AtomicU8,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { forced: AtomicU8::new(0) })
    }

    fn bump(&self) -> u8 {
        self.forced.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Spawns tasks listening for SIGINT and (on unix) SIGTERM. The first signal
/// sends [`ShutdownEvent::Graceful`]; any signal after that sends
/// [`ShutdownEvent::Immediate`].
pub fn spawn_signal_handlers(shutdown: Arc<ShutdownController>, tx: mpsc::Sender<ShutdownEvent>) {
    let ctrl_c_shutdown = shutdown.clone();
    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            emit(&ctrl_c_shutdown, &ctrl_c_tx, "SIGINT").await;
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(_) => return,
            };
            loop {
                if term.recv().await.is_none() {
                    return;
                }
                emit(&shutdown, &tx, "SIGTERM").await;
            }
        });
    }
}

async fn emit(shutdown: &ShutdownController, tx: &mpsc::Sender<ShutdownEvent>, signal_name: &str) {
    let count = shutdown.bump();
    if count == 1 {
        info!(signal = signal_name, "shutdown requested, stopping gracefully");
        let _ = tx.send(ShutdownEvent::Graceful).await;
    } else {
        info!(signal = signal_name, "second shutdown signal, exiting immediately");
        let _ = tx.send(ShutdownEvent::Immediate).await;
    }
}
