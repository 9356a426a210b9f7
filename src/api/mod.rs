//! HTTP and WebSocket surface (spec.md §6). Thin translation layer: every
//! handler here parses a vendor-shaped body, delegates to
//! [`crate::router::Router`], and shapes the result (or error) back into
//! that vendor's envelope. No routing or statistics logic lives in this
//! module.

pub mod admin;
pub mod admin_auth;
pub mod client;
pub mod client_auth;
pub mod health;
pub mod request_id;
pub mod ws;
