pub mod client;
pub mod config;
pub mod coordinator;
pub mod err;
pub mod normalize;
pub mod sandbox;
pub mod tester;
pub mod util;

#[cfg(test)]
mod test;
