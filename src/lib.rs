//! # Rust LA Core Library
//!
//! This crate is the core library for `rust_la`, a transport-agnostic control
//! and capture engine for logic-analyzer hardware. One uniform contract —
//! connect, query capability/status, run a timed sample capture, disconnect —
//! covers devices reachable over a serial link, TCP, or UDP. A driver is the
//! composition of a transport, a frame codec, and a command set; the shared
//! correlation and capture machinery is written once and reused by all of
//! them.
//!
//! ## Crate Structure
//!
//! - **`config`**: TOML-backed settings — transport selection, protocol
//!   family, and the timeout budget. See `config::Settings`.
//! - **`transport`**: the byte-channel abstraction plus the serial, TCP, UDP,
//!   and in-memory mock implementations.
//! - **`framing`**: incremental frame codecs for the three wire formats
//!   (text lines, JSON lines, length-prefixed binary).
//! - **`correlator`**: the pending-command table matching asynchronous
//!   responses to outstanding requests, with per-command deadlines.
//! - **`descriptor`**: the immutable `DeviceDescriptor` produced at connect
//!   time and consumed by capture validation and external readers.
//! - **`profile`**: per-family command templates and response parsing — the
//!   device-specific configuration injected into the shared engine.
//! - **`negotiator`**: best-effort capability negotiation.
//! - **`capture`**: capture plans, validation, and the capture state machine
//!   with its at-most-one-outcome guarantee.
//! - **`session`**: the public `DeviceSession` handle and the per-connection
//!   worker event loop.
//! - **`mock_device`**: a scripted analyzer for tests and hardware-free runs.
//! - **`error`**: the `LaError` taxonomy shared across the crate.

pub mod capture;
pub mod config;
pub mod correlator;
pub mod descriptor;
pub mod error;
pub mod framing;
pub mod mock_device;
pub mod negotiator;
pub mod profile;
pub mod session;
pub mod transport;
