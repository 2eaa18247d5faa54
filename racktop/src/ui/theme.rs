//! Shared UI theme constants.

use ratatui::style::Color;

pub const LIVE: Color = Color::Green;
pub const OFFLINE: Color = Color::Red;
pub const PENDING: Color = Color::Yellow;
pub const MUTED: Color = Color::DarkGray;

// Chart series
pub const AI_CPU: Color = Color::Cyan;
pub const AI_MEMORY: Color = Color::Magenta;
pub const AI_GPU: Color = Color::LightRed;
pub const APP_CPU: Color = Color::Green;
pub const STORAGE_CPU: Color = Color::Yellow;
