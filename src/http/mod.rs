//! HTTP/1.1 protocol implementation.
//!
//! Just enough HTTP/1.1 to sit between a client and a backend: message heads
//! are parsed and rewritten, bodies are streamed through without buffering.
//!
//! # Architecture
//!
//! - **`connection`**: Per-client request loop with keep-alive
//! - **`handler`**: The `Handler` trait that connections dispatch to
//! - **`parser`**: Parses request and response heads from byte buffers
//! - **`headers`**: Ordered, case-insensitive header list
//! - **`request`**: Inbound request head
//! - **`response`**: Locally generated responses and backend response heads
//! - **`body`**: Body framing detection and streaming relay
//! - **`writer`**: Serializes message heads and local responses
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for the next request head
//!        └──────┬──────┘
//!               │ Head parsed (400/431 and close otherwise)
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Handler writes exactly one response
//!        └──────┬───────────┘
//!               ├─ KeepAlive → Reading (same connection)
//!               └─ Close → Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kubelet_proxy::http::connection::Connection;
//! use tokio::net::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:10255").await?;
//! loop {
//!     let (socket, peer) = listener.accept().await?;
//!     let handler = Arc::clone(&handler);
//!     tokio::spawn(async move {
//!         let _ = Connection::new(socket, Some(peer), handler).run().await;
//!     });
//! }
//! ```

pub mod body;
pub mod connection;
pub mod handler;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
