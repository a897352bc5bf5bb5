//! Messaging client adapter.
//!
//! Owns the driver lifecycle: initialization, pairing, readiness, reconnects,
//! logout and re-initialization. HTTP handlers and the WebSocket relay reach
//! the client only through [`ClientAdapter`].

mod adapter;
mod commands;
mod error;
mod reconnect;

pub use adapter::{
    BackfillOptions, ClientAdapter, ClientOptions, ClientOverview, ClientStatus,
    DEFAULT_HISTORY_LIMIT, MessageView, SessionPaths, UserProfile,
};
pub use commands::{BotCommand, ChatFacts, CommandOptions};
pub use error::{ClientError, ClientResult};
pub use reconnect::ReconnectPolicy;
