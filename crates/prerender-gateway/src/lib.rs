//! # prerender-gateway
//!
//! The HTTP face of the prerender gateway: a catch-all axum route that
//! normalizes the raw target URL, consults the cache, renders on a miss,
//! and post-processes the HTML (in-band meta directives, script stripping)
//! on the way out.

pub mod normalize;
pub mod postprocess;
pub mod server;

pub use normalize::normalize_target;
pub use postprocess::{apply as postprocess_html, PostProcessOutput};
pub use server::{router, serve, AppState, SharedState};

use prerender_browser::{BrowserDriver, ChromeRenderer, DriverConfig, Renderer};
use prerender_core::GatewayConfig;
use std::sync::Arc;
use tracing::info;

/// Run the gateway: launch the browser, wire the cache, serve until a
/// shutdown signal arrives, then take the browser down with us.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let driver = Arc::new(
        BrowserDriver::launch(DriverConfig {
            chrome_path: config.chrome_path.clone(),
        })
        .await?,
    );
    let renderer: Arc<dyn Renderer> =
        Arc::new(ChromeRenderer::new(Arc::clone(&driver), config.render.clone()));
    let cache = prerender_cache::from_config(&config.cache)?;

    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on {}", addr);

    let state = Arc::new(AppState {
        renderer,
        cache,
        config,
    });
    server::serve(state, &addr, shutdown_signal()).await?;

    driver.shutdown().await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("signal caught, shutting down");
}
