pub mod handler;
pub mod limiter;
pub mod pool;
pub mod reaper;
pub mod registry;

pub use handler::Handler;
pub use limiter::RateLimiter;
pub use pool::{Pool, PoolConfig};
pub use reaper::Reaper;
pub use registry::Registry;
