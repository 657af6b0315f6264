pub mod config;
pub mod jobs;
pub mod logs;
pub mod plugins;
pub mod runs;
pub mod session;
pub mod sites;
