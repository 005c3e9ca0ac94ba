//! knight: drive a microcontroller over a serial line with a small
//! line-oriented script language.
//!
//! ```text
//!   stdin thread ──► session / interpreter ──write──► device
//!                           │                           │
//!                           ▼                           ▼
//!                        console ◄──────────── reader task
//! ```

pub mod baud;
pub mod cli;
pub mod config;
pub mod connection;
pub mod console;
pub mod reader;
pub mod script;
pub mod session;
pub mod transport;
