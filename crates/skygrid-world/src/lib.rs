//! In-memory sandbox world implementing every host capability, plus the
//! schematic file format it reads and writes.

pub mod blueprint;
pub mod sandbox;
pub mod schematic_file;

pub use sandbox::{Op, SandboxWorld};
pub use schematic_file::{SchematicFile, SchematicFileError};
