pub mod api;
pub mod config;
pub mod error;
pub mod id;
pub mod invites;
pub mod mailbox;
pub mod one_time;
pub mod rate_limit;
pub mod rooms;
pub mod state;
pub mod totals;
pub mod ws;
