//! elib: small conveniences around downloading, hashing, processes, git and
//! a few web services.
//!
//! Code map:
//! - `base_system`: config layering, settings, logging, path helpers
//! - `download`: HEAD check, buffered GET, digest check, write-or-clean-up
//! - `hash`: named digest methods
//! - `run`: executable lookup and process runner
//! - `repo`: git working tree wrapper
//! - `paste`, `tts`: glot.io snippets and Google Translate speech
//! - `github`, `updater`: release lookup and in-place executable update

pub mod base_system;
pub mod download;
pub mod github;
pub mod hash;
pub mod paste;
pub mod repo;
pub mod run;
pub mod tts;
pub mod updater;

pub use download::download;
pub use hash::{HashMethod, get_hash};
