//! Store implementations for problems, submissions and user progress

#[cfg(test)]
pub mod memory;
pub mod redis;

pub use self::redis::RedisStore;
