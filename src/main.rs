use anyhow::Result;
use clap::Parser;
use pm::collector::MAX_WORKERS;
use pm::commands::{self, config::RemoteSettings};
use std::path::PathBuf;

/// pm - package manager for an SSH/SFTP package store
///
/// Publish a directory tree as a versioned package, or fetch packages
/// (optionally constrained by version) back onto this machine.
///
/// Examples:
///   pm --host 10.0.0.5 --user deploy create packet.json
///   pm --host 10.0.0.5 --user deploy update packages.json --dest vendor
#[derive(Parser, Debug)]
#[command(author, version = env!("PM_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    remote: RemoteArgs,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Archive the files of a packet description and upload them as a new version
    Create(CreateArgs),

    /// Download and extract the packages of a package description
    Update(UpdateArgs),
}

#[derive(clap::Args, Debug)]
pub struct CreateArgs {
    /// Packet description (JSON)
    #[arg(value_name = "PACKET_FILE")]
    pub file: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct UpdateArgs {
    /// Package description (JSON)
    #[arg(value_name = "PACKAGES_FILE")]
    pub file: PathBuf,

    /// Directory receiving one subdirectory per package (defaults to the current directory)
    #[arg(long, short = 'd', value_name = "DIR")]
    pub dest: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct RemoteArgs {
    /// Server address (IPv4 or IPv6 literal)
    #[arg(long, env = "PM_HOST", global = true, default_value = "")]
    host: String,

    /// Server SSH port
    #[arg(long, env = "PM_PORT", global = true, default_value = "22")]
    port: String,

    /// Login name
    #[arg(long, env = "PM_USER", global = true, default_value = "")]
    user: String,

    /// Login password
    #[arg(long, env = "PM_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Private key (PEM) used instead of the password
    #[arg(long = "key-file", env = "PM_KEY_FILE", value_name = "PATH", global = true)]
    key_file: Option<PathBuf>,

    /// OpenSSH known_hosts file; when set, the server's host key must match it
    #[arg(long = "known-hosts", env = "PM_KNOWN_HOSTS", value_name = "PATH", global = true)]
    known_hosts: Option<PathBuf>,

    /// Check that an explicitly requested version exists before fetching it
    #[arg(long = "verify-versions", global = true)]
    verify_versions: bool,

    /// Maximum number of concurrent directory scans
    #[arg(long, global = true, default_value_t = MAX_WORKERS)]
    workers: usize,
}

impl From<RemoteArgs> for RemoteSettings {
    fn from(args: RemoteArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            user: args.user,
            password: args.password,
            key_file: args.key_file,
            known_hosts: args.known_hosts,
            verify_versions: args.verify_versions,
            workers: args.workers,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = pm::runtime::RealRuntime;
    let settings = RemoteSettings::from(cli.remote);

    match cli.command {
        Commands::Create(args) => commands::create(runtime, &args.file, &settings)?,
        Commands::Update(args) => {
            commands::update(runtime, &args.file, args.dest.as_deref(), &settings)?
        }
    }
    println!("Operation is successful.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_create_parsing() {
        let cli = Cli::try_parse_from(["pm", "create", "packet.json"]).unwrap();
        match cli.command {
            Commands::Create(args) => {
                assert_eq!(args.file, PathBuf::from("packet.json"));
            }
            _ => panic!("Expected Create command"),
        }
        assert_eq!(cli.remote.port, "22");
        assert_eq!(cli.remote.workers, MAX_WORKERS);
        assert!(!cli.remote.verify_versions);
    }

    #[test]
    fn test_cli_update_parsing() {
        let cli = Cli::try_parse_from(["pm", "update", "packages.json", "--dest", "vendor"]).unwrap();
        match cli.command {
            Commands::Update(args) => {
                assert_eq!(args.file, PathBuf::from("packages.json"));
                assert_eq!(args.dest, Some(PathBuf::from("vendor")));
            }
            _ => panic!("Expected Update command"),
        }
    }

    #[test]
    fn test_cli_global_remote_options() {
        let cli = Cli::try_parse_from([
            "pm",
            "--host",
            "10.0.0.5",
            "--user",
            "deploy",
            "update",
            "packages.json",
            "--port",
            "2222",
            "--key-file",
            "/keys/id",
            "--verify-versions",
        ])
        .unwrap();

        let settings = RemoteSettings::from(cli.remote);
        assert_eq!(settings.host, "10.0.0.5");
        assert_eq!(settings.user, "deploy");
        assert_eq!(settings.port, "2222");
        assert_eq!(settings.key_file, Some(PathBuf::from("/keys/id")));
        assert!(settings.verify_versions);
    }

    #[test]
    fn test_cli_requires_file() {
        assert!(Cli::try_parse_from(["pm", "create"]).is_err());
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        let result = Cli::try_parse_from(["pm", "packet.json"]);
        assert!(result.is_err());
    }
}
