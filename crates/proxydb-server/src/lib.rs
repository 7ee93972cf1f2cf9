//! ProxyDB server and client library.
//!
//! Serves an object registry over a Unix socket so remote clients can hold
//! synchronized proxies of its connections and databases and invoke their
//! behavior as if it were local.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod server;

pub use channel::{Channel, LocalChannel, SocketChannel};
pub use proxy::ProxyClient;
pub use server::ProxyServer;
