use clap::Parser;
use client::app::ClientApp;
use client::input::KeyboardMouse;
use client::network::{ClientConfig, ConnectionState};
use client::rendering::{HudInfo, Renderer};
use log::{error, info, warn};
use macroquad::prelude::{
    is_key_pressed, is_quit_requested, next_frame, prevent_quit, screen_height, screen_width,
    Conf, KeyCode,
};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Prediction ticks per second
    #[arg(short, long, default_value_t = shared::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// How long predicted inputs are kept for replay, in milliseconds
    #[arg(long, default_value = "2000")]
    history_ms: u64,

    /// Run without a window, driven by a random wandering bot
    #[arg(long)]
    headless: bool,

    /// Window width
    #[arg(short = 'w', long, default_value = "800")]
    width: i32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: i32,
}

impl From<&Args> for ClientConfig {
    fn from(args: &Args) -> Self {
        Self {
            server_addr: SocketAddr::new(args.host, args.port),
            tick_rate: args.tick_rate,
            history_retention: Duration::from_millis(args.history_ms),
            ..Default::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let runtime = Runtime::new()?;

    info!("Starting client...");
    let mut app = runtime.block_on(ClientApp::start(ClientConfig::from(&args)))?;

    if args.headless {
        app.spawn_bot();
        runtime.block_on(wait_for_exit(&app));
        runtime.block_on(app.shutdown())?;
        return Ok(());
    }

    info!("Controls: WASD to move, Space to jump, mouse to look, Esc to quit");
    let conf = Conf {
        window_title: "Avatar Netcode Client".to_string(),
        window_width: args.width,
        window_height: args.height,
        ..Default::default()
    };
    macroquad::Window::from_config(conf, render_loop(app, runtime));
    Ok(())
}

async fn wait_for_exit(app: &ClientApp) {
    let mut check = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                return;
            }
            _ = check.tick() => {
                if app.is_network_finished() {
                    warn!("Lost connection to server");
                    return;
                }
            }
        }
    }
}

async fn render_loop(app: ClientApp, runtime: Runtime) {
    prevent_quit();

    let world = app.world();
    let capture = app.input();
    let mut renderer = Renderer::new(screen_width(), screen_height());
    let mut keyboard = KeyboardMouse::new();
    let mut characters = Vec::new();
    let mut hud = HudInfo::default();

    loop {
        if is_quit_requested() || is_key_pressed(KeyCode::Escape) {
            break;
        }
        if app.is_network_finished() {
            warn!("Lost connection to server");
            break;
        }

        keyboard.poll(&capture);

        // Keep the previous frame while prediction or reconciliation holds the world
        if let Ok(world) = world.try_lock() {
            characters = world.characters();
            hud = HudInfo {
                connection: ConnectionState::observe(
                    world.local_id(),
                    app.is_network_finished(),
                ),
                stats: world.stats(),
                player_count: characters.len(),
            };
        }

        renderer.render(&characters, hud);
        next_frame().await;
    }

    if let Err(e) = runtime.block_on(app.shutdown()) {
        error!("Client stopped with error: {}", e);
    }
}
