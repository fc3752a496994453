//! Completion provider implementations
//!
//! Concrete implementations of the AIProvider trait for hosted
//! completion services.

pub mod openai;

pub use openai::{ApiFlavor, OpenAIProvider};
