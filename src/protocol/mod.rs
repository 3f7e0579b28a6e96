//! CornerStone130 command protocol
//!
//! ASCII, case-sensitive, one command per line. Queries end with `?` and return a single
//! response line; set commands return nothing.
//!
//! - [`command`]: typed builders for every command string the controller sends
//! - [`response`]: trimming and typed parsing of instrument answers
//! - [`error_table`]: status/error code descriptions

pub mod command;
pub mod error_table;
pub mod response;

pub use command::{OperatingUnit, ShutterState};
pub use error_table::{classify, ErrorEntry, ERROR_TABLE};
