#![forbid(unsafe_code)]

//! `spool-events`
//!
//! Broadcast event bus for the caching proxy. All components publish into
//! one channel; subscribers filter what they care about.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{FileStat, ProxyEvent};
