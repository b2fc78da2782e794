//! TCP server accepting postgres clients.
use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;

use crate::{Error, Result, backend::Backend, config::Config, session::Session};

/// Accepts clients and runs one [`Session`] task per connection.
///
/// `factory` builds the backend handle for each accepted connection, handles are never
/// shared between sessions.
#[derive(Debug)]
pub struct Server<F> {
    listener: TcpListener,
    config: Arc<Config>,
    factory: F,
}

impl<F, B> Server<F>
where
    F: Fn() -> B,
    B: Backend + 'static,
{
    /// Bind to the configured listen address.
    pub async fn bind(config: Config, factory: F) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .map_err(|err| Error::from(err).context(format!("bind {}:{}", config.host, config.port)))?;

        #[cfg(feature = "log")]
        log::info!(
            "listening on {}",
            listener.local_addr().map_or_else(|e| e.to_string(), |addr| addr.to_string()),
        );

        Ok(Self { listener, config: Arc::new(config), factory })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients forever.
    pub async fn serve(self) {
        loop {
            let (socket, addr) = match self.listener.accept().await {
                Ok(ok) => ok,
                Err(err) => {
                    log_accept_error(err);
                    continue;
                }
            };

            if let Err(err) = socket.set_nodelay(true) {
                log_accept_error(err);
            }

            let session = Session::new(socket, (self.factory)(), self.config.clone());
            let process_id = session.process_id();

            let task = async move {
                let result = session.run().await;
                log_session_end(process_id, addr, result);
            };

            #[cfg(feature = "verbose")]
            let task = tracing::Instrument::instrument(task, tracing::trace_span!("session", process_id));

            tokio::spawn(task);
        }
    }
}

#[cfg(feature = "log")]
fn log_accept_error(err: std::io::Error) {
    log::error!("failed to accept client: {err}");
}

#[cfg(not(feature = "log"))]
fn log_accept_error(_: std::io::Error) { }

#[cfg(feature = "log")]
fn log_session_end(process_id: u32, addr: SocketAddr, result: Result<()>) {
    match result {
        Ok(()) => log::debug!("session {process_id} ({addr}) closed"),
        Err(err) => log::error!("session {process_id} ({addr}) terminated: {err}"),
    }
}

#[cfg(not(feature = "log"))]
fn log_session_end(_: u32, _: SocketAddr, _: Result<()>) { }
