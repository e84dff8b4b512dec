mod error;
mod interface;
#[cfg(feature = "json-store")]
mod json;
mod memory;
mod record;

pub use error::*;
pub use interface::*;
#[cfg_attr(docsrs, doc(cfg(feature = "json-store")))]
#[cfg(feature = "json-store")]
pub use json::*;
pub use memory::*;
pub use record::*;
