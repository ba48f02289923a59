#[cfg(not(target_os = "linux"))]
compile_error!("edge_http is built on epoll and eventfd and only supports Linux");

pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod event_loop;
pub mod http;
pub mod poller;
pub mod pool;
pub mod request;
pub mod response;
pub mod slab;
pub mod static_files;

/// Re-exports of common components for easier access
pub use acceptor::Acceptor;
pub use buffer::ByteBuffer;
pub use config::{CredentialConfig, ServerConfig};
pub use connection::{Connection, HttpContext, Next};
pub use credentials::{
    ConnPool, CredentialConnection, CredentialConnector, CredentialStore, MemoryUserDb,
    PooledCredentialStore,
};
pub use error::{ResourceError, ServerError, ServerResult};
pub use event_loop::{EventLoop, ShutdownHandle};
pub use http::{content_type, Method, Status};
pub use poller::{Event, Events, Interest, Poller};
pub use pool::{PoolStats, TaskError, TaskHandle, WorkerPool};
pub use request::{HttpRequest, ParseState, ParseStatus};
pub use response::HttpResponse;
pub use static_files::{MemoryResourceProvider, MmapResourceProvider, Resource, ResourceProvider};
