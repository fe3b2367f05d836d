//! Message bus and the bounded channel it is built on.

mod bus;
mod channel;

pub use bus::{ChannelHandler, MessageBus, DEFAULT_CAPACITY};
pub use channel::BoundedChannel;
