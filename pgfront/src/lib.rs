//! Postgres wire protocol front end
//!
//! Speaks the postgres frontend/backend protocol to clients and drives any SQL backend
//! implementing [`Backend`]. Supported are the simple query protocol and
//! `COPY ... FROM STDIN` in text format.
//!
//! # Examples
//!
//! ```no_run
//! use pgfront::{Config, MemoryBackend, Server};
//!
//! # async fn app() -> pgfront::Result<()> {
//! let backend = MemoryBackend::new();
//! backend.create_table("keyvalue", ["key", "value"]);
//!
//! let server = Server::bind(Config::from_env(), move || backend.clone()).await?;
//! server.serve().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Partial commit
//!
//! Every CopyData message is written to the backend as soon as it is decoded. A COPY that
//! ends with CopyFail, a malformed record or a closed connection keeps the rows of the
//! chunks written before it. Callers that need all or nothing semantics must arrange it
//! in the backend.

pub mod common;
mod ext;

// Protocol
pub mod postgres;
pub mod stream;

// Component
pub mod backend;
pub mod statement;
pub mod copy;
pub mod session;
pub mod server;

mod config;
mod error;

pub use config::{Config, ParseError};
pub use backend::{Backend, BackendError, MemoryBackend};
pub use session::Session;
pub use server::Server;
pub use error::{Error, ErrorKind, Result, StatementError};
