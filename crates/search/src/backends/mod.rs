//! Storage backend implementations.
//!
//! Each backend implements [`SearchStorage`](crate::core::SearchStorage) by
//! translating expression trees into its own query form.
//!
//! # Available Backends
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | Memory | [`memory`] | Versioned JSON records evaluated in process, for tests and embedding |

pub mod memory;
