pub mod config;
pub mod consumer;
pub mod events;
pub mod handlers;
pub mod queue;
pub mod services;
pub mod startup;
