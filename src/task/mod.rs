pub mod manager;
pub mod queue;
pub mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use manager::*;
pub use queue::DispatchOrder;
pub use types::*;
