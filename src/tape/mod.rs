pub mod loader;
pub mod recorder;
pub mod schema;

pub use loader::{load_events, LoadedTape};
pub use schema::{Event, EventType, PARSER_VERSION};
