mod generator;
mod sleep_provider;
mod tokio;

pub use generator::*;
pub use sleep_provider::*;
pub use self::tokio::*;
