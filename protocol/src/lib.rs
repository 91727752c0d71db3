//! Wire types shared between the governor stores and the hook binary.
//!
//! The host runtime delivers one JSON event per hook activation on stdin and
//! consumes advisory lines on stdout plus a process exit code. This crate
//! defines both sides of that contract and nothing else — no I/O.

pub mod event;
pub mod verdict;

pub use event::HookEventKind;
pub use event::ToolInvocationEvent;
pub use verdict::Decision;
pub use verdict::EXIT_ALLOW;
pub use verdict::EXIT_BLOCK;
pub use verdict::Verdict;
