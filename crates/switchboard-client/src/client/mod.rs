//! Client runtime.
//!
//! - `core`: [`Client`], scope lifecycle, introspection
//! - `builder`: [`ClientBuilder`] and [`ClientTarget`]
//! - `session`: one connection per server, handshake, request/response
//! - `dispatcher`: correlation table and the per-session reader task
//! - `router`: server notifications and server-initiated requests
//! - `aggregator`: prefixing, namespace merging and routing
//! - `operations`: tools, resources and prompts

mod aggregator;
mod builder;
mod core;
mod dispatcher;
pub mod operations;
mod router;
mod session;

pub use aggregator::{Aggregator, Namespace, NamespaceEntry};
pub use builder::{ClientBuilder, ClientTarget};
pub use self::core::{Client, ClientScope};
pub use operations::prompts::PromptOutcome;
pub use operations::tools::{CallOptions, CallToolOutcome};
pub use session::{Session, SessionHandle, SessionId, SessionState};
