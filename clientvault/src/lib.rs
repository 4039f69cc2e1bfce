pub mod backend;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod context;
pub mod identity;
pub mod resilience;
pub mod search;

#[cfg(test)]
mod testing;
