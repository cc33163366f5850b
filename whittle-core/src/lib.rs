//! # whittle-core
//!
//! The editing core of whittle: a transactional undo/redo engine built around
//! command scripts that derive their own inverses at execution time, and a
//! dependency-driven track evaluator that re-derives exactly the objects an
//! edit touched.
//!
//! Windowing, rendering and the concrete track/geometry implementations live
//! elsewhere; this crate only talks to them through the traits in [`context`]
//! and [`scene::track`].

pub mod commands;
pub mod context;
pub mod eval;
pub mod id;
pub mod math;
pub mod scene;
pub mod undo;

pub use id::ObjectId;
