//! A Conan-compatible registry server with no storage of its own: recipe
//! metadata lives in GitHub release bodies and package files are release
//! assets.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use controllers::{handle, App};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use logging::setup_logging;
use miette::IntoDiagnostic;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;

mod auth;
mod config;
mod controllers;
mod logging;
mod routes;

#[derive(Parser, Debug)]
#[command(name = "shelf-server", version)]
#[command(about = "Conan-compatible registry server backed by GitHub releases")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overriding the configuration
    #[arg(short, long)]
    listen: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose, args.quiet);

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    serve(config).await
}

async fn serve(config: Config) -> miette::Result<()> {
    let addr: SocketAddr = config.listen.parse().into_diagnostic()?;
    let app = Arc::new(App::new(config));

    let listener = TcpListener::bind(addr).await.into_diagnostic()?;
    info!("listening on http://{addr}");

    let server = ConnBuilder::new(TokioExecutor::new());

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((socket, _)) => {
                        let app = Arc::clone(&app);
                        let server = server.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let app = Arc::clone(&app);
                                async move { Ok::<_, Infallible>(handle(&app, req).await) }
                            });
                            if let Err(err) = server
                                .serve_connection(TokioIo::new(socket), service)
                                .await
                            {
                                debug!("connection error: {err}");
                            }
                        });
                    }
                    Err(err) => warn!("failed to accept connection: {err}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
