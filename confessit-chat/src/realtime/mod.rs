pub mod events;
pub mod registry;

pub use events::{ClientFrame, ServerEvent, StatusChange};
pub use registry::ConnectionRegistry;
