// src/models/mod.rs
pub mod driver;
pub mod earnings;
pub mod offline;
pub mod trip;

pub use driver::*;
pub use earnings::*;
pub use offline::*;
pub use trip::*;
