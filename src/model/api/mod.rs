//! API-compatible types.
//!
//! Field names follow the public wire format (`titulo`, `perguntas`,
//! `respostas`, ...), so these structs deliberately don't use Rust naming.

pub mod authoring;
pub mod submission;
