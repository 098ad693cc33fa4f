#[macro_use]
extern crate lazy_static;

#[macro_use]
mod log;

pub mod api_semantics;
pub mod cli;
pub mod error;
pub mod events;
pub mod flags;
pub mod record;
pub mod record_source;
pub mod replay_engine;
pub mod snapshot;
pub mod symbol_table;
pub mod sync_registry;
pub mod thread_registry;
pub mod thread_state;
