//! End-to-end tests for the Lunaria runtime
//!
//! These tests build a runtime from options, run Luau source and script
//! files through it, and check the values that come back.

mod harness;
mod modules;
mod scripts;
mod timers;
