use clap::Parser;
use log::{error, info};
use server::game::IntegrationStep;
use server::network::{Server, ServerConfig};
use shared::shutdown_channel;
use std::net::{IpAddr, SocketAddr};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Authoritative ticks per second
    #[arg(short, long, default_value_t = shared::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Integrate inputs with the client's recorded delta-time instead of the server tick
    #[arg(long)]
    use_sample_dt: bool,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: SocketAddr::new(args.host, args.port),
            tick_rate: args.tick_rate,
            max_clients: args.max_clients,
            integration: if args.use_sample_dt {
                IntegrationStep::SampleDelta
            } else {
                IntegrationStep::ServerTick
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ServerConfig::from(Args::parse());
    let server = Server::bind(config).await?;

    let (trigger, signal) = shutdown_channel();
    let mut handle = tokio::spawn(server.run(signal));

    tokio::select! {
        result = &mut handle => {
            // The server stopped on its own; surface why
            return match result {
                Ok(result) => Ok(result?),
                Err(e) => {
                    error!("Server task panicked: {}", e);
                    Err(e.into())
                }
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    trigger.trigger();
    handle.await??;
    Ok(())
}
