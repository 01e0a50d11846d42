//! Transport multiplexing: one reactor task owns the wire connection and
//! correlates replies to outstanding requests so callers never touch the
//! socket directly.
//!
//! Three logical channels ride the same connection, matching the
//! request/stream/fire-and-forget shape MT5-style gateways expose:
//!
//! - **Req** — request/response, correlated by id through a pending table.
//! - **Sub** — server-pushed events fanned out by topic to subscribers.
//! - **Push** — fire-and-forget outbound, no reply expected.

pub mod frame;
pub mod multiplexer;

pub use frame::{ChannelKind, Frame};
pub use multiplexer::{TransportError, TransportMultiplexer, WireTransport};
