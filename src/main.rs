use std::env;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use story_orchestrator::{
    app::{ComponentRegistry, build_router},
    config::Config,
};

fn main() -> anyhow::Result<()> {
    // `story-orchestrator healthcheck` is the container liveness command; it
    // runs before any runtime or configuration is set up.
    if env::args().nth(1).as_deref() == Some("healthcheck") {
        std::process::exit(run_healthcheck());
    }
    serve()
}

/// Probe the local control plane on the configured bind port.
/// Returns exit code 0 on success, 1 on failure.
fn run_healthcheck() -> i32 {
    let port = Config::http_bind_from_env().port();
    let url = format!("http://127.0.0.1:{port}/health/live");

    let response = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|client| client.get(&url).send().map_err(anyhow::Error::from));

    match response {
        Ok(response) if response.status().is_success() => 0,
        Ok(response) => {
            eprintln!("healthcheck failed: status {}", response.status());
            1
        }
        Err(error) => {
            eprintln!("healthcheck failed: {error:#}");
            1
        }
    }
}

#[tokio::main]
async fn serve() -> anyhow::Result<()> {
    // Tracing and the panic hook are installed by Telemetry inside the
    // registry build.
    let config = Config::from_env().context("failed to load configuration")?;
    let bind_addr = config.http_bind();
    let mut registry = ComponentRegistry::build(config)
        .await
        .context("failed to build component registry")?;

    let shutdown = registry.shutdown_token();
    let consumer_handle = registry.spawn_consumer()?;
    let router = build_router(registry.app_state());

    // Propagate SIGTERM/ctrl-c into the consumer's cancellation token.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        shutdown.cancel();
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;

    info!(%bind_addr, "listening");

    let server_shutdown = shutdown.clone();
    if let Err(error) = axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
    {
        warn!(error = %error, "server exited with error");
    }

    // The consumer stops pulling on cancellation and drains in-flight
    // handlers before returning.
    shutdown.cancel();
    match consumer_handle.await {
        Ok(Ok(())) => info!("consumer stopped cleanly"),
        Ok(Err(error)) => error!(error = %format!("{error:#}"), "consumer exited with error"),
        Err(join_error) => error!(error = %join_error, "consumer task failed"),
    }

    Ok(())
}
