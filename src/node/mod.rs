//! The data plane: request pipeline, downloader, garbage collector, notifier.

pub mod cache_registry;
pub mod downloader;
pub mod gc;
pub mod notifier;
pub mod proxy;
pub mod scheduler_client;
pub mod server;
pub mod state;

pub use cache_registry::CacheRegistry;
pub use scheduler_client::SchedulerClient;
pub use server::run;
pub use state::NodeState;
