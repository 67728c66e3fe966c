//! Shared render types for tendril.
//!
//! The agent loop never paints anything itself. Everything it wants a human
//! to see is pushed across the render boundary as a [`UiElement`], which the
//! front end is free to draw however it likes.

mod ui;

pub use ui::*;
