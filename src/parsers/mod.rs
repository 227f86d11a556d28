//! Page source parsing for link discovery and DOM image sweeps.

pub mod html;
