//! Core data models for the file transit service.
//!
//! Keys are the only persistent identity this service manages; everything
//! else about an object is reported by the store at read or list time.

pub mod key;
pub mod object;
