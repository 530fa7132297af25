//! Extension packages and their in-process representation.
//!
//! Packages are discovered on disk ([`package_store`]), described by a
//! manifest ([`manifest`]) and turned into live instances through an explicit
//! factory table ([`loader`]).

pub mod assets;
pub mod contract;
pub mod loader;
pub mod manifest;
pub mod package_store;
pub mod surface;
pub mod version;
