pub mod aggregator;
pub mod base;
pub mod builtin;
pub mod compose;
pub mod evaluate;
pub mod result;

#[cfg(test)]
mod tests;

pub use aggregator::*;
pub use base::*;
pub use builtin::*;
pub use compose::*;
pub use evaluate::*;
pub use result::*;
