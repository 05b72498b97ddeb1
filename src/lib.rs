pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod group;
pub mod model;
pub mod routes;
pub mod server;
