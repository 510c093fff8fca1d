//! Raw TCP protocol: length-prefixed MessagePack envelopes driven by an
//! explicit per-connection state machine.
//!
//! A session starts `Unauthenticated` and accepts only `CONNECT`, which
//! validates the token, opens a dedicated engine handle for the named
//! database and moves the session to `Authenticated`. The bound database
//! cannot be switched afterwards.

mod server;
mod session;

pub use server::{serve, SHUTDOWN_MESSAGE};
pub use session::{BoundDatabase, Session, SessionState};
