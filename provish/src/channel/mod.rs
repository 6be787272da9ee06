//! Channel layer for output classification and PTY operations.
//!
//! This module handles the raw interactive stream: bounded reads,
//! accumulation of command output, and classification of console text
//! into semantic events.

mod buffer;
pub mod classifier;
mod pty;

pub use buffer::OutputBuffer;
pub use classifier::{ClassifiedEvent, Classification};
pub use pty::{ChannelConfig, PtyChannel};
