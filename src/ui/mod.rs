//! # UI Module
//!
//! Styling shared by the application views.

pub mod styles;
