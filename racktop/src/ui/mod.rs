//! UI module root: exposes drawing functions for individual panels.

pub mod chart;
pub mod details;
pub mod header;
pub mod servers;
pub mod theme;
pub mod util;
