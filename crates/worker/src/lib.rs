//! `shotfarm-worker` library crate.
//!
//! Hosts the render queue executor and everything it drives: scene
//! loading, the render delegate boundary, the subprocess-backed
//! delegate, local queue mode and the tick-driven service loop. The
//! binary entrypoint lives in `main.rs`.

pub mod cli;
pub mod config;
pub mod delegate;
pub mod executor;
pub mod local;
pub mod process;
pub mod scene;
pub mod service;
pub mod state;
