use clap::{Parser, Subcommand};
use lifeline_stream::transport::TcpTransport;
use lifeline_stream::{Endpoint, LifelineResult, LivenessConfig, LivenessStream, Role};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML liveness settings; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept streams and echo every request back as a response.
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        listen: String,
    },
    /// Open a stream, send stdin lines as requests and print the responses.
    Connect {
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        addr: String,
    },
}

fn load_config(path: Option<&str>) -> LifelineResult<LivenessConfig> {
    match path {
        Some(path) => LivenessConfig::from_yaml_file(path),
        None => Ok(LivenessConfig::default()),
    }
}

/// Turns an accepted connection into a responder stream. Failures concern
/// this connection only and are logged.
fn open_accepted(
    endpoint: &Endpoint<String>,
    accepted: io::Result<(TcpStream, SocketAddr)>,
) -> Option<LivenessStream<String>> {
    let (socket, peer) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!("Accept failed: {}", e);
            return None;
        }
    };
    let transport = match TcpTransport::from_stream(socket) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!("Dropping connection from {}: {}", peer, e);
            return None;
        }
    };
    match endpoint.open(Arc::new(transport), Role::Responder) {
        Ok(stream) => {
            tracing::info!("Stream {} opened by {}", stream.id(), peer);
            Some(stream)
        }
        Err(e) => {
            tracing::warn!("Could not open stream for {}: {}", peer, e);
            None
        }
    }
}

async fn echo(stream: LivenessStream<String>) {
    let (handle, mut requests) = stream.split();
    loop {
        match requests.next().await {
            Ok(Some(request)) => {
                if let Err(e) = handle.send(request).await {
                    tracing::warn!("Could not answer on {}: {}", handle.id(), e);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Stream {} failed: {}", handle.id(), e);
                break;
            }
        }
    }
    tracing::info!("Stream {} closed: {}", handle.id(), handle.closed().await);
}

async fn serve_on(
    listener: TcpListener,
    endpoint: Endpoint<String>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = &mut shutdown => break,
        };
        if let Some(stream) = open_accepted(&endpoint, accepted) {
            tokio::spawn(echo(stream));
        }
    }
    endpoint.shutdown().await;
}

async fn serve(listen: &str, config: LivenessConfig) -> LifelineResult<()> {
    let listener = TcpListener::bind(listen).await?;
    let endpoint = Endpoint::<String>::new(config)?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    serve_on(listener, endpoint, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot wait for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;
    Ok(())
}

async fn connect(addr: &str, config: LivenessConfig) -> LifelineResult<()> {
    let transport = TcpTransport::connect(addr).await?;
    let stream = LivenessStream::<String>::open(Arc::new(transport), Role::Initiator, &config)?;
    tracing::info!("Stream {} connected to {}", stream.id(), addr);
    let (handle, mut responses) = stream.split();

    let printer = tokio::spawn(async move {
        while let Some(response) = responses.next().await? {
            println!("{}", response);
        }
        Ok::<_, lifeline_stream::LifelineError>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            termination = handle.closed() => {
                tracing::info!("Stream closed: {}", termination);
                break;
            }
            _ = tokio::signal::ctrl_c() => None,
        };
        match line {
            Some(line) => handle.send(line).await?,
            None => {
                handle.close().await;
                break;
            }
        }
    }

    match printer.await {
        Ok(result) => result,
        Err(e) => lifeline_stream::lifeline_bail!(Generic, "printer task failed: {}", e),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config is invalid: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Initialised with config {:?}", &config);

    let result = match cli.command {
        Command::Serve { listen } => serve(&listen, config).await,
        Command::Connect { addr } => connect(&addr, config).await,
    };
    if let Err(e) = result {
        eprintln!("Stream failed: {}", e);
        std::process::exit(1);
    }
}
