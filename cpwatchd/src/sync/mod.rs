pub mod coordinator;
pub mod debounce;
pub mod decision;
pub mod engine;
pub mod ignore;
pub mod local_watcher;
pub mod paths;
pub mod processor;
pub mod queue;
pub mod self_writes;
#[cfg(test)]
mod test_support;
pub mod times;
pub mod walker;
