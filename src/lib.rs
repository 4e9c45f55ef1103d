pub mod alerts;
pub mod auth;
pub mod billing;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod promo_code;
pub mod reaper;
pub mod sql;
pub mod view;
pub mod wal;
pub mod wire;
