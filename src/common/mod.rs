// Common utilities and shared types used across the application

pub mod bounded;
pub mod clock;

// Re-export commonly used items at module root for convenience
pub use bounded::bounded;
pub use clock::{Clock, ManualClock, SystemClock};
