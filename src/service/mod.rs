//! # Service Layer
//!
//! Hosting for the topology manager.
//!
//! ## Components
//! - **Overlay**: dedicated network worker thread with start/stop handoff and
//!   a bounded-wait maintenance tick

pub mod overlay;

pub use overlay::Overlay;
