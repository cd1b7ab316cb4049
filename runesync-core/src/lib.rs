//! Runesync Core
//!
//! This crate provides a fine-grained reactive state engine and the wire
//! protocol that keeps a server copy and a browser copy of named state
//! collections consistent in real time. It implements:
//!
//! - Reactive primitives (signals, derived values, effects) for the server
//!   (thread-safe) and for the browser (single-threaded, microtask batched)
//! - Named collections of JSON signals with diffs, validation and pruning
//! - The sync protocol: `init`/`update`/`patch`/`sync`/`error`/`ack`
//!   messages, optimistic writes with rollback, JSON and MessagePack frames
//!
//! # Architecture
//!
//! - `reactive`: server engine, thread-local dependency tracking
//! - `client`: browser engine, microtask-driven delivery
//! - `state`: collections, snapshots, diffs, pruner, registry
//! - `sync`: messages, codecs, the channel state machine, transports
//! - `batch`, `subscriber`: pieces shared by both engines
//!
//! # Example
//!
//! ```rust
//! use runesync_core::reactive::{Derived, Effect, Signal};
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! let count = Signal::new(0);
//!
//! let doubled = {
//!     let count = count.clone();
//!     Derived::new(move || count.get() * 2)
//! };
//!
//! let seen = Arc::new(AtomicI32::new(0));
//! let _effect = {
//!     let (doubled, seen) = (doubled.clone(), seen.clone());
//!     Effect::new(move || seen.store(doubled.get(), Ordering::SeqCst))
//! };
//!
//! count.set(5);
//! assert_eq!(seen.load(Ordering::SeqCst), 10);
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod reactive;
pub mod state;
pub mod subscriber;
pub mod sync;

pub use error::{Error, Result};
