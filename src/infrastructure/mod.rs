pub mod db;
pub mod notify;
pub mod queue;
