//! # archive-core
//!
//! Context-scoped resource plumbing for the archive service's background
//! job queue: an abstract [`Clock`], a nested-savepoint transaction manager,
//! the structured logger hook contract, the job payload codec, and the
//! explicit [`Runtime`] that carries all of it by reference.
//!
//! This crate is deliberately policy-light: it defines the interfaces the
//! job queue (`archive-jobqueue`) and its external collaborators (web
//! handlers, scrapers, the downloader/transcoder wrappers) consume, without
//! implementing any of those collaborators itself.

mod clock;
mod config;
mod error;
mod logger;
mod payload;
mod runtime;
mod savepoint;

pub use clock::{Clock, ErrorClock, RealClock, ScriptedClock, ScriptedResult, StackedClock, StaticClock};
pub use config::{Config, LogQueries};
pub use error::RuntimeError;
pub use logger::{record_fields, HookFn, HookPair, LogField, LoggerHooks};
pub use payload::{decode, encode, Params};
pub use runtime::{JobQueueHandle, NoOpJobQueueHandle, Runtime, RuntimeBuilder, TemplateCollection};
pub use savepoint::{with_savepoint, with_transaction, Savepoint};
