//! racktop: live terminal dashboard for the AI, application and storage
//! servers. The library holds the synchronization core; the binary draws it.

pub mod api;
pub mod app;
pub mod bus;
pub mod config;
pub mod history;
pub mod logging;
pub mod profiles;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod types;
pub mod ui;
pub mod ws;
