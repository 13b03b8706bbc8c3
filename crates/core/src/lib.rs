pub mod config;
pub mod error;
pub mod event;
pub mod week;

pub use config::Config;
pub use error::*;
pub use event::*;
pub use week::*;
