//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `bridge` - Platform bridge trait and the bounded fix queue
//! - `event_channel` - Bounded channel sink for async event subscribers
//! - `egress` - Event output to file (JSONL format)
//! - `fix_source` - JSONL fix replay from a file or stdin

pub mod bridge;
pub mod egress;
pub mod event_channel;
pub mod fix_source;

// Re-export commonly used types
pub use bridge::{create_fix_channel, BridgeSink, FixSender, PlatformBridge};
pub use egress::{EventEgress, EventPayload};
pub use event_channel::{create_event_channel, ChannelSink};
pub use fix_source::{parse_fix_line, replay_fixes, start_fix_reader};
