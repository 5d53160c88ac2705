#![forbid(unsafe_code)]

pub mod api;
pub mod health;
pub mod http;
pub mod sweeper;


#[cfg(test)]
mod http_tests;
