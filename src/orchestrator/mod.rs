//! Application-level orchestration utilities.
//!
//! This module owns run lifecycle control (start/stop) and post-run processing
//! such as exports and history refresh. UI/CLI layers call into this module to
//! keep responsibilities separated.

mod chat;
mod controller;
mod post_process;

pub(crate) use chat::chat_once;
pub(crate) use controller::{run_controller, Runner, UiCommand};
pub(crate) use post_process::{process_run_completion, ExportTargets};
