//! Generic Access Profile ([Vol 3] Part C).

pub use uuid::*;

mod uuid;
