pub mod delegate;
pub mod task_queue;


pub use delegate::*;
pub use task_queue::*;
