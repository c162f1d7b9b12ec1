pub mod args;
pub mod encoder;
pub mod error;
pub mod job;
pub mod options;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod thumbnail;
pub mod transcoder;
