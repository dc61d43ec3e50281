//! Global allocator selection: a feature-gated swap between the system
//! allocator and `mimalloc`.

#[cfg(feature = "mimalloc")]
pub use mimalloc::MiMalloc as Allocator;

#[cfg(not(feature = "mimalloc"))]
pub use std::alloc::System as Allocator;
