//! Whole-predicate rewrites over the routine graph.
//!
//! `choice`, `env`, `reftrack` and `vars` run together until none of them
//! finds more work. `packing` runs once afterwards and shrinks the result.

pub(crate) mod choice;
pub(crate) mod env;
pub(crate) mod packing;
pub(crate) mod reftrack;
pub(crate) mod vars;

pub(crate) use choice::optimize_choice_frames;
pub(crate) use env::optimize_env_frames;
pub(crate) use packing::{pack_instructions, resolve_jump_chains};
pub(crate) use reftrack::track_refs;
pub(crate) use vars::optimize_vars;
