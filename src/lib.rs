pub mod config;
pub mod geocalc;
pub mod location;
pub mod stats;
