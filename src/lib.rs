//! # connect_graphql_gateway
//!
//! A protocol-translating RPC gateway that sits in front of a GraphQL
//! endpoint and exposes each pre-registered GraphQL operation as a unary
//! (or server-streaming, for subscriptions) RPC method over the Connect,
//! gRPC, and gRPC-Web wire protocols.
//!
//! Each immediate subdirectory of a `services_dir` pairs `.proto` service
//! definitions with `.graphql` operation files; the gateway decodes an
//! inbound call in whichever wire protocol the client spoke, looks up the
//! matching operation scoped to the called service, forwards it (with
//! request headers) to the upstream GraphQL endpoint, and encodes the
//! response back in the caller's protocol.
//!
//! ## Example
//!
//! ```rust,no_run
//! use connect_graphql_gateway::{Config, GatewayServer};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::parse();
//!     let server = GatewayServer::new(config);
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod operations;
pub mod server;
pub mod streaming;
pub mod transcode;
pub mod upstream;

pub use config::Config;
pub use descriptor::DescriptorLoader;
pub use discovery::{discover, ServiceBundle};
pub use error::{Classification, ConnectCode, Error, ErrorMeta, GatewayError};
pub use handler::RpcHandler;
pub use operations::{OperationKind, OperationRecord, OperationRegistry};
pub use server::GatewayServer;
pub use upstream::UpstreamClient;
