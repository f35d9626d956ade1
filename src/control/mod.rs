//! Control layer exposing mixer state to external tooling.

/// High-level control API for the mixer.
pub mod api;
/// Sine-tone demo devices.
pub mod demo;
/// Ratatui-based developer console.
pub mod ui;
