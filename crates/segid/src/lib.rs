#![cfg_attr(docsrs, feature(doc_cfg))]

mod buffer;
mod config;
mod error;
mod executor;
#[cfg(feature = "async-tokio")]
mod futures;
mod generator;
mod lock;
mod registry;
mod segment;
mod status;
mod store;
mod time;

pub use crate::buffer::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::executor::*;
#[cfg(feature = "async-tokio")]
pub use crate::futures::*;
pub use crate::generator::*;
pub use crate::registry::*;
pub use crate::segment::*;
pub use crate::status::*;
pub use crate::store::*;
pub use crate::time::*;
