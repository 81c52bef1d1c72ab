//! The conversion pipeline stages.
//!
//! Stages run in a fixed order per conversion:
//!
//! 1. [`preprocess`] — regex-driven substitution of renderable fragments,
//!    concurrent per pass via [`substitute`], guarded by [`resilience`];
//! 2. [`assemble`] — markdown token stream → document elements;
//! 3. serialization (in [`crate::docx`]) — elements → binary archive.
//!
//! [`render`] and [`sandbox`] are the adapter layer the first stage calls
//! into; they know nothing about markdown.

pub mod assemble;
pub mod preprocess;
pub mod render;
pub mod resilience;
pub mod sandbox;
pub mod substitute;
