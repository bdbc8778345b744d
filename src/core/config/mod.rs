pub mod data;
pub mod io;
mod printing;

pub use data::Config;
pub use io::ConfigError;
