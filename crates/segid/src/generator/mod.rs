mod allocator;
mod prefetch;

pub use allocator::*;
