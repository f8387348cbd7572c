//! Upstream client: wire schema, event-stream protocol, sessions
//!
//! Everything that talks to the upstream conversation service lives
//! here. The pool owns `BotSession` instances; the lifecycle worker owns
//! the auth flow.

pub mod arkose;
pub mod auth;
pub mod session;
pub mod stream;
pub mod wire;

pub use arkose::ArkoseClient;
pub use auth::AuthClient;
pub use session::{BotSession, DEFAULT_TIMEOUT_SECS};
pub use wire::{ConversationPayload, TurnEvent, WireMessage, DEFAULT_MODEL};
