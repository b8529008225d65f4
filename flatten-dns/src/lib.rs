pub mod config;
pub mod error;
pub mod flatten;
pub mod forward;
pub mod handler;
pub mod server;
pub mod upstream;

pub use config::*;
pub use error::{ConfigError, Error};
pub use flatten::*;
pub use forward::*;
pub use handler::*;
pub use server::*;
pub use upstream::*;
