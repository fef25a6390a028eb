pub mod body;
pub mod delay;
pub mod inject;
pub mod lifecycle;
pub mod observer;
pub mod pending_event;
pub mod state;
pub mod timeout;

#[cfg(test)]
mod tests;

pub use body::*;
pub use delay::*;
pub use lifecycle::*;
pub use observer::*;
pub use pending_event::*;
pub use state::*;
pub use timeout::*;
