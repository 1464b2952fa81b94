pub mod appender;
pub mod build_context;
pub mod client;
pub mod config;
pub mod errors;
pub mod facade;
pub mod facade_factory;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod scm;
pub mod service;
pub mod wrapper;

pub use errors::{TfsError, TfsResult};
