use tokio::sync::watch;

/// Held by `main`; firing it drains the web server, the idle reaper and
/// every open socket.
#[derive(Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

#[derive(Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

impl ShutdownTx {
    pub fn trigger(&self) {
        if self.0.send(true).is_err() {
            tracing::debug!("Shutdown triggered with no subsystems listening");
        }
    }
}

impl ShutdownRx {
    /// The raw watch receiver; the net and lifecycle crates take it directly.
    pub fn into_inner(self) -> watch::Receiver<bool> {
        self.0
    }
}

/// Resolve on the first SIGINT or SIGTERM (Ctrl+C off Unix).
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => tracing::info!(signal = "SIGINT", "Signal received"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "Signal received"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!(signal = "ctrl-c", "Signal received");
    }
    Ok(())
}
