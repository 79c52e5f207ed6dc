pub mod cursor;
pub mod executor;
pub mod operators;
pub mod plan;
