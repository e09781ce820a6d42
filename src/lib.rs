pub mod auth;
pub mod config;
pub mod engine;
pub mod hours;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod tls;
pub mod wire;
