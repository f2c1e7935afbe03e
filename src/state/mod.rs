//! State module for tracking crawl task progress
//!
//! # Components
//!
//! - `TaskState`: the closed set of lifecycle states a crawl task moves through

mod task_state;

pub use task_state::TaskState;
