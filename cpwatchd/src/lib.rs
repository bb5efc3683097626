pub mod daemon;
pub mod logging;
pub mod sync;
