//! Command-line surface (spec.md §6). Short options cluster and `--` ends
//! options, both handled for free by `clap`'s derive parser the way the
//! teacher's server binaries use it for their own CLI surfaces.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "station", about = "LoRaWAN packet-forwarding station control plane", version)]
pub struct Cli {
    /// Log file, optionally with `,SIZE[,ROTATIONS]`.
    #[arg(short = 'L', long = "log-file", value_name = "FILE[,SIZE[,ROT]]")]
    pub log_file: Option<String>,

    /// Numeric level 0..7, or a named level.
    #[arg(short = 'l', long = "log-level", value_name = "LVL|0..7")]
    pub log_level: Option<String>,

    #[arg(short = 'h', long = "home", value_name = "DIR")]
    pub home: Option<PathBuf>,

    #[arg(short = 't', long = "temp", value_name = "DIR")]
    pub temp: Option<PathBuf>,

    #[arg(short = 'i', long = "radio-init", value_name = "CMD")]
    pub radio_init: Option<String>,

    #[arg(short = 'x', long = "eui-prefix", value_name = "ID6")]
    pub eui_prefix: Option<String>,

    /// Print the resolved configuration and exit.
    #[arg(short = 'p', long = "params")]
    pub params: bool,

    /// Print the version and exit 0.
    #[arg(short = 'v', long = "version-info")]
    pub version_info: bool,

    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,

    /// Kill any pre-existing instance before starting.
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Kill any pre-existing instance and exit.
    #[arg(short = 'k', long = "kill")]
    pub kill: bool,

    #[arg(short = 'N', long = "no-tc")]
    pub no_tc: bool,

    #[arg(long = "no-cups")]
    pub no_cups: bool,

    // Hidden/advanced flags, not part of the documented surface.
    #[arg(long = "slave", short = 'S', hide = true)]
    pub slave: Option<i32>,

    #[arg(long = "exec", short = 'X', hide = true)]
    pub exec: Option<String>,

    #[arg(long = "selftests", hide = true)]
    pub selftests: bool,

    #[arg(long = "fscmd", hide = true)]
    pub fscmd: Option<String>,

    #[arg(long = "fskey", hide = true)]
    pub fskey: Option<String>,

    #[arg(long = "fscd", hide = true)]
    pub fscd: Option<String>,

    /// Anything after `--`, passed through uninterpreted (e.g. to `--exec`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub trailing: Vec<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_options_cluster() {
        let cli = Cli::parse_from(["station", "-dfN"]);
        assert!(cli.daemon);
        assert!(cli.force);
        assert!(cli.no_tc);
    }

    #[test]
    fn double_dash_ends_options() {
        let cli = Cli::parse_from(["station", "--home", "/tmp/home", "--", "-not-an-option"]);
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/home")));
    }
}
