//! A schema compiler for message types shared between C++ compiled to
//! WebAssembly and its JavaScript host.
//!
//! Schemas are lexed and parsed into a [`surface::Module`], every definition
//! is resolved to a wire [`layout`], and the [`emit`] module generates a C++
//! header, a host runtime and host declarations that agree byte for byte.

pub mod binary;
pub mod emit;
pub mod layout;
pub mod reporting;
pub mod source;
pub mod surface;

mod driver;

pub use driver::{default_color_choice, Driver, Status};
