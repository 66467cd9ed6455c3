pub mod analysis;
pub mod config;
pub mod debug;
pub mod pipeline;
pub mod pool;
pub mod processor;
pub mod rect;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod video;

#[cfg(test)]
mod testing;
