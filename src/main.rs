//! gateway-server: serve a gateway application over HTTP/1.x.
//!
//! The binary hosts a small built-in demo application that echoes what the
//! server saw; embedders use the library and pass their own `Application`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use gateway_server::config::{load_config, ExecutionMode, ServerConfig, TlsConfig};
use gateway_server::gateway::util::request_uri;
use gateway_server::lifecycle::signals;
use gateway_server::observability::{init_logging, metrics};
use gateway_server::{AppError, Body, Environ, HttpServer, Shutdown, StartResponse};

#[derive(Parser)]
#[command(name = "gateway-server")]
#[command(about = "Minimal HTTP/1.x server for gateway applications", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind, overriding the configuration.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding the configuration.
    #[arg(short, long)]
    port: Option<u16>,

    /// PEM certificate chain; enables TLS together with `--key`.
    #[arg(long, requires = "key")]
    cert: Option<String>,

    /// PEM private key.
    #[arg(long, requires = "cert")]
    key: Option<String>,

    /// Serve TLS with a throwaway self-signed certificate.
    #[arg(long, conflicts_with = "cert")]
    adhoc_tls: bool,

    /// Serve one connection at a time.
    #[arg(long)]
    sequential: bool,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.listener.host = host;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let (Some(cert_path), Some(key_path)) = (self.cert, self.key) {
            config.listener.tls = Some(TlsConfig { cert_path, key_path });
            config.listener.adhoc_tls = false;
        }
        if self.adhoc_tls {
            config.listener.tls = None;
            config.listener.adhoc_tls = true;
        }
        if self.sequential {
            config.server.execution = ExecutionMode::Sequential;
        }
        Ok(config)
    }
}

/// Demo application: reports the request back as plain text.
fn echo(mut environ: Environ<'_>, start_response: StartResponse) -> Result<Body, AppError> {
    let body = environ.input().read_all()?;

    let mut text = format!(
        "{} {}\n",
        environ.method(),
        request_uri(&environ, true)
    );
    for (key, value) in environ.vars().filter(|(k, _)| k.starts_with("HTTP_")) {
        text.push_str(&format!("{key}: {value}\n"));
    }
    if !body.is_empty() {
        text.push_str(&format!("\n{} body bytes\n", body.len()));
    }

    start_response.start("200 OK", [("Content-Type", "text/plain; charset=utf-8")])?;
    Ok(Body::from(text))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    init_logging(&config.observability)?;
    metrics::set_enabled(config.observability.metrics_enabled);
    if config.observability.metrics_enabled {
        metrics::describe();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address(),
        execution = ?config.server.execution,
        idle_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone())?;

    let server = HttpServer::new(Arc::new(echo), config);
    server.serve(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
