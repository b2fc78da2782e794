use tracing::{Instrument, trace_span};
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use pgfront::{Config, MemoryBackend, Result, Server};

mod demo;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let backend = MemoryBackend::new();
    backend.create_table("keyvalue", ["key", "value"]);

    let server = {
        let backend = backend.clone();
        Server::bind(Config::from_env(), move || backend.clone()).await?
    };
    let addr = server.local_addr()?;
    tokio::spawn(server.serve());

    demo::main(addr).instrument(trace_span!("demo")).await?;

    tracing::info!("keyvalue: {:?}", backend.rows("keyvalue"));

    Ok(())
}
