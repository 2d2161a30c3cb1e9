pub mod span;

pub use span::{span_middleware, CORRELATION_ID_HEADER};
