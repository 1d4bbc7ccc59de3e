//! Public types for the Genie API.

mod generate;
mod message;
mod response;

pub use generate::{GenerationRequest, GenerationResult, normalize_language};
pub use message::{Message, Role};
pub use response::{Completion, Usage};
