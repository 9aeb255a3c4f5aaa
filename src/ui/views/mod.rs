mod failed_operations;
mod queue;

pub use failed_operations::FailedOperationsView;
pub use queue::QueueView;
