//! Forkchat is a terminal client for streaming, continuing and branching
//! chat conversations against a remote data-stream endpoint.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversation state: the streaming decoder, the
//!   transcript and its sync throttle, the cross-tab sync bus, branching,
//!   persistence and configuration.
//! - [`api`] defines the request payloads sent to the upstream endpoint.
//! - [`cli`] parses arguments and runs the one-shot subcommands.
//! - [`utils`] holds logging setup, URL helpers, attachments and clocks.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which builds a
//! [`core::session::SessionContext`] and drives a
//! [`core::controller::ConversationController`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
