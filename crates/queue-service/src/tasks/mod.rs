//! Background tasks for the queue service.
//!
//! - `channel_sweeper` - Drops per-provider ring and presence channels that
//!   no display listens to anymore

pub mod channel_sweeper;

pub use channel_sweeper::start_channel_sweeper;
