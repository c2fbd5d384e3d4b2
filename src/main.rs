use coserve::config::Config;
use coserve::http::HttpProtocol;
use coserve::http::inspect::Inspect;
use coserve::server::Server;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let server = Server::from_config(HttpProtocol::new(Inspect), &cfg)?;
    server.shutdown_on_signal();
    server.run()
}
