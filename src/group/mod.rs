pub mod repeat;
pub mod retry;
pub mod task_group;


pub use repeat::*;
pub use retry::*;
pub use task_group::*;
