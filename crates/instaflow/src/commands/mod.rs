pub mod apply;
pub mod destroy;
pub mod import;
pub mod ips;
pub mod plan;
pub mod refresh;
pub mod state;
