//! Grimoire — a local spell sidecar.
//!
//! A thin daemon exposing spell management and execution over HTTP and a
//! line-oriented stdio transport. Spells are user-authored Rhai scripts
//! loaded once per process and cached by canonical path; an optional
//! language-model capability is injected into their namespace.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod spells;
pub mod subsystems;
pub mod supervisor;
