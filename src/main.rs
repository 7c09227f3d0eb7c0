use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bellbird::{AppEnv, Config, Http, Manager, Session};

fn init_tracing(app_env: AppEnv) {
    let default_directive = match app_env {
        AppEnv::Development => "bellbird=debug,info",
        AppEnv::Production => "bellbird=info,warn",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    match app_env {
        AppEnv::Development => {
            tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
        },
        AppEnv::Production => {
            tracing_subscriber::fmt().with_env_filter(filter).compact().init();
        },
    }
}

/// Cancels the root token on SIGINT or SIGTERM. Cancellation is monotone:
/// a second signal does nothing extra (the process is already draining).
fn install_signal_handler(root: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {e}");
                    return;
                },
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                _ = terminate.recv() => info!("SIGTERM received"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received");
        }

        root.cancel();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; the environment itself may be fully set.
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        },
    };

    init_tracing(config.app_env);

    let root = CancellationToken::new();
    install_signal_handler(root.clone());

    let http = Arc::new(Http::new(config.http_base_url.clone(), config.bot_token.clone()));
    let manager = Arc::new(Manager::new());
    let session = Session::new(&config, http, Arc::clone(&manager), root.clone());

    info!("starting gateway session");

    match session.run().await {
        Ok(()) => {
            info!("graceful shutdown complete");
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!("fatal gateway error: {e}");
            ExitCode::FAILURE
        },
    }
}
