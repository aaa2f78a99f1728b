pub mod config;
pub mod events;
pub mod voice;

pub use config::*;
pub use events::*;
pub use voice::*;
