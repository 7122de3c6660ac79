//! Domain primitives shared across modules.

mod timestamp;

pub use timestamp::UtcDateTime;
