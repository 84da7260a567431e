//! Command-line utilities for dcfsync
//!
//! # dcf-tool
//!
//! Reads the configuration of a device into a DCF file, or writes a DCF file to a device.
//!
//! Usage examples:
//!
//! - `dcf-tool -i can0 -n 5 read motor.eds -o motor.dcf`
//! - `dcf-tool -i can0 -n 5 write motor.dcf`

pub mod command;
