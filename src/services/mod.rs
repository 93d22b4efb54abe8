pub mod gateway;

pub use gateway::{Gateway, GatewayStats, Stage};
