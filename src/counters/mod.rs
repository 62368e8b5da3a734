pub mod keys;
pub mod memory;
pub mod redis;
pub mod trait_def;

pub use keys::{CounterKeys, Resolution};
pub use memory::InMemoryCounterStore;
pub use self::redis::RedisCounterStore;
pub use trait_def::{CounterCommand, CounterError, CounterResult, CounterStore};
