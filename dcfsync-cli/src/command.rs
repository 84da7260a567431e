use clap::{Args, Parser, Subcommand};
use dcfsync_client::{common::NodeId, DriverKind};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// The CAN driver to use
    #[arg(short, long = "bustype", default_value = "socketcan")]
    pub bustype: DriverKind,
    /// The CAN channel to open
    #[arg(short, long, default_value = "can0")]
    pub interface: String,
    /// The ID of the device
    #[arg(short, long = "nodeid", default_value = "1")]
    pub nodeid: NodeId,
    /// Path to a TOML file with run options
    #[arg(long, value_hint=clap::ValueHint::FilePath)]
    pub options: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read the device configuration into a DCF file
    Read(ReadArgs),
    /// Write a DCF file to the device
    Write(WriteArgs),
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// The EDS file describing the device
    #[arg(value_hint=clap::ValueHint::FilePath)]
    pub eds: PathBuf,
    /// Where to save the DCF. Defaults to the EDS path with a .dcf extension.
    #[arg(short, long, value_hint=clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

impl ReadArgs {
    /// The path the DCF will be written to
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.eds.with_extension("dcf"))
    }
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    /// The DCF file to write
    #[arg(value_hint=clap::ValueHint::FilePath)]
    pub dcf: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_defaults() {
        let cli = Cli::try_parse_from(["dcf-tool", "read", "dir/motor.eds"]).unwrap();
        assert_eq!(DriverKind::SocketCan, cli.bustype);
        assert_eq!("can0", cli.interface);
        assert_eq!(1, cli.nodeid.raw());
        assert!(cli.options.is_none());
        match cli.command {
            Commands::Read(args) => {
                assert_eq!(PathBuf::from("dir/motor.dcf"), args.output_path())
            }
            _ => panic!("Expected read command"),
        }
    }

    #[test]
    fn test_write_flags() {
        let cli = Cli::try_parse_from([
            "dcf-tool", "-b", "SocketCAN", "-i", "vcan0", "-n", "5", "--options", "run.toml",
            "write", "motor.dcf",
        ])
        .unwrap();
        assert_eq!("vcan0", cli.interface);
        assert_eq!(5, cli.nodeid.raw());
        assert_eq!(Some(PathBuf::from("run.toml")), cli.options);
        match cli.command {
            Commands::Write(args) => assert_eq!(PathBuf::from("motor.dcf"), args.dcf),
            _ => panic!("Expected write command"),
        }
    }

    #[test]
    fn test_invalid_args() {
        assert!(Cli::try_parse_from(["dcf-tool", "-n", "200", "read", "a.eds"]).is_err());
        assert!(Cli::try_parse_from(["dcf-tool", "-b", "pcan", "read", "a.eds"]).is_err());
    }
}
