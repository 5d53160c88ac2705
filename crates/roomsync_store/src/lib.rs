#![forbid(unsafe_code)]

pub mod events;
pub mod hashes;
pub mod presence;
pub mod rooms;
pub mod store;

pub use store::Store;

#[cfg(test)]
mod store_tests;
