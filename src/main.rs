//! Demo server: two hello-world routes plus an optional static root.
//!
//! ```bash
//! cargo run -- --port 8080 --static-root ./www
//! curl http://localhost:8080/json
//! curl http://localhost:8080/xml
//! ```

use std::path::PathBuf;

use clap::Parser;
use shoal::{HandlerResponse, Request, RouteTable, Server, ServerConfig};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "shoal", about = "Multi-reactor HTTP serving engine demo")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "SHOAL_PORT")]
    port: u16,

    /// Serve files from this directory for unrouted paths.
    #[arg(long, env = "SHOAL_STATIC_ROOT")]
    static_root: Option<PathBuf>,
}

fn json_handler(_req: &Request, res: &mut HandlerResponse) {
    res.set_header("Content-Type", "text/json ; charset=UTF-8");
    res.set_header("Server", "Example");
    res.write_body(
        serde_json::json!({ "message": "Hello, World!" })
            .to_string()
            .as_bytes(),
    );
}

fn xml_handler(_req: &Request, res: &mut HandlerResponse) {
    res.set_header("Content-Type", "text/xml ; charset=UTF-8");
    res.set_header("Server", "Example");
    res.write_body(b"<message>hello, world!</message>");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut routes = RouteTable::new();
    routes.register("/json", json_handler);
    routes.register("/xml", xml_handler);

    let mut config = ServerConfig::new(cli.port);
    config.static_root = cli.static_root;

    let server = Server::start(config, routes)?;
    info!(addr = %server.local_addr(), "serving; press Ctrl-C to drain and exit");

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let _ = signals.forever().next();

    info!("signal received, draining");
    server.stop(true);
    Ok(())
}
