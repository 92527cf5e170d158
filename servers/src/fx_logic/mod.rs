// Shared by server_fx, fx_watchdog and fx_client; each binary uses a subset.
#![allow(dead_code)]

pub mod config;

/// Loads `.env`, then the platform file (`.env.linux` / `.env.windows`).
/// Variables already set in the environment win.
pub fn load_dotenv() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

/// Resolves when SIGINT or (on Unix) SIGTERM arrives.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => tracing::info!("SIGTERM received, initiating shutdown."),
    }
}
