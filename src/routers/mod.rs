//! Request routing to downstream backends

pub mod dispatch;
pub mod error;
pub mod openai;
pub mod triton;
