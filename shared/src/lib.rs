//! Shared types for the site builder backend
//!
//! Domain models, the unified error system, pagination DTOs, event payloads
//! and id generation. No I/O lives here.

pub mod error;
pub mod message;
pub mod models;
pub mod query;
pub mod util;

// Re-exports
pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use message::{EventEnvelope, EventType, OrderEvent};
pub use query::{PaginatedResponse, PaginationRequest, SortOrder};
