pub mod clock;
pub mod config;
pub mod error;
pub mod link;
pub mod proto;
pub mod session;

mod sync;

#[cfg(test)]
mod test;
