//! Pipeline stages for batch certificate generation.
//!
//! Each submodule implements one step of a batch.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ingest ──▶ dedup ──▶ assets ──▶ binding ──▶ render ──▶ package
//! (checks)  (xlsx)     (last    (unzip,    (image     (PDF per   (zip)
//!                       wins)    statics)   slots)     candidate)
//! ```
//!
//! 1. [`input`]  : existence and format checks on the spreadsheet and uploads
//! 2. [`ingest`] : first sheet to candidate records via calamine; blocking
//! 3. [`dedup`]  : collapse repeated identifiers in place, last value wins
//! 4. [`assets`] : unpack the photo archive flat, list static images
//! 5. [`binding`]: tier-driven upload validation and image slot resolution
//! 6. [`render`] : compile the template once, render each candidate on the
//!    blocking pool
//! 7. [`package`]: write rendered documents into one zip archive

pub mod assets;
pub mod binding;
pub mod dedup;
pub mod ingest;
pub mod input;
pub mod package;
pub mod render;
