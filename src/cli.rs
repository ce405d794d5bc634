use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::parse_attribute;

#[derive(Debug, Clone, Parser)]
#[command(name = "bundle-forge")]
#[command(about = "Turn a compiled Java archive into an OSGi bundle")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Where staging directories are created.
    #[arg(long, value_name = "DIR", global = true)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Compute OSGi headers for an archive and rewrite it as a bundle.
    Build(BuildArgs),
    /// Print every class in the given archives as JSON.
    Inspect {
        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,
    },
    /// Show which classpath entries would be used.
    Resolve {
        #[arg(value_name = "PATH")]
        paths: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    #[arg(long, value_name = "FILE")]
    pub jar: Option<PathBuf>,

    /// Defaults to overwriting the input archive.
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[arg(long = "bnd", value_name = "FILE")]
    pub descriptor: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub classpath: Vec<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub sourcepath: Vec<PathBuf>,

    #[arg(long = "attr", value_name = "KEY=VALUE", value_parser = parse_attribute)]
    pub attributes: Vec<(String, String)>,

    #[arg(long, value_name = "NAME")]
    pub base_name: Option<String>,

    #[arg(short = 'v', long, value_name = "VER")]
    pub version: Option<String>,

    #[arg(long, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// JSON task file; flags given alongside it take precedence.
    #[arg(long, value_name = "FILE")]
    pub task: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_flags() {
        let cli = Cli::parse_from([
            "bundle-forge",
            "build",
            "--jar",
            "foo.jar",
            "--attr",
            "Bundle-Name=Foo",
            "--classpath",
            "a.jar",
            "--classpath",
            "b.jar",
            "--work-dir",
            "/tmp/w",
        ]);
        assert_eq!(cli.work_dir, Some(PathBuf::from("/tmp/w")));
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.jar, Some(PathBuf::from("foo.jar")));
        assert_eq!(
            args.attributes,
            vec![("Bundle-Name".to_string(), "Foo".to_string())]
        );
        assert_eq!(args.classpath.len(), 2);
    }

    #[test]
    fn rejects_malformed_attribute() {
        let parsed = Cli::try_parse_from(["bundle-forge", "build", "--attr", "oops"]);
        assert!(parsed.is_err());
    }
}
