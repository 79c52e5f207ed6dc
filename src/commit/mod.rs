pub mod mutation;
pub mod pipeline;
pub mod retry;
pub mod tx;
