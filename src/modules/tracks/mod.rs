pub mod events;
pub mod handler;
pub mod memory;
pub mod model;
pub mod repository;
pub mod service;
