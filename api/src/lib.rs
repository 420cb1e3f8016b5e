pub mod app;
pub mod bootstrap;
pub mod config;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
pub mod telemetry;
