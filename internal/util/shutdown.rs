pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "unable to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "shutdown signal received"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "shutdown signal received"),
    }
}

#[cfg(test)]
mod tests {
    use super::shutdown_signal;
    use std::sync::Mutex;
    use tokio::time::{sleep, timeout, Duration};

    static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

    #[tokio::test]
    #[cfg(unix)]
    async fn shutdown_signal_handles_sigterm() {
        let _guard = SIGNAL_LOCK.lock().expect("lock");
        let handle = tokio::spawn(async { shutdown_signal().await });
        sleep(Duration::from_millis(50)).await;
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("timeout")
            .expect("join");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn shutdown_signal_handles_sigint() {
        let _guard = SIGNAL_LOCK.lock().expect("lock");
        let handle = tokio::spawn(async { shutdown_signal().await });
        sleep(Duration::from_millis(50)).await;
        unsafe {
            libc::raise(libc::SIGINT);
        }
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("timeout")
            .expect("join");
    }
}
