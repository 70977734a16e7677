//! Meshgate - one reverse proxy per overlay hostname
//!
//! This library exposes several internal services on a private overlay
//! network, each under its own stable hostname:
//! - Reads a small mapping file of `<hostname>=<origin>` pairs
//! - Joins the overlay once per hostname, with per-identity credential state
//! - Reverse-proxies inbound traffic to the origin, over TCP/HTTP or a
//!   local unix domain socket
//! - Isolates failures: one hostname's proxy dying never touches the rest

pub mod config;
pub mod error;
pub mod fleet;
pub mod forward;
pub mod lifecycle;
pub mod origin;
pub mod overlay;
