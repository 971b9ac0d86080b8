use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use portal_auth::Role;
use reqwest::Method;

#[derive(Parser, Debug)]
#[command(
    name = "portal",
    author,
    version,
    about = "Role-scoped portal sessions from the command line",
    long_about = None
)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "PORTAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Credential file
    #[arg(
        long,
        global = true,
        env = "PORTAL_STORE",
        default_value = ".portal/credentials.json"
    )]
    pub store: PathBuf,

    /// Page path the request is made from, e.g. `/teacher/planner`.
    /// Without it the context is detached and no credential is inferred.
    #[arg(short, long, global = true)]
    pub location: Option<String>,

    /// Log filter directive (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    /// Load `env_file` (default: `.env` in the working directory or a
    /// parent) into the environment, then parse `argv`. Variables already
    /// set in the environment win over the file.
    pub fn parse_with_dotenv<I, T>(env_file: Option<&Path>, argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        // A missing file is not an error.
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).ok();
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        Self::try_parse_from(argv)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and store the returned credential pair for a role
    Login {
        #[arg(short, long)]
        role: Role,

        /// Login endpoint, relative to the base URL
        #[arg(short, long, default_value = "/auth/login")]
        endpoint: String,

        /// Body field as `key=value`; repeatable
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Forget the credentials of a role
    Logout {
        #[arg(short, long)]
        role: Role,
    },

    /// Send a request through the authenticated pipeline
    Request {
        #[arg(value_parser = parse_method)]
        method: Method,

        /// Path relative to the base URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Send as this role instead of the one inferred from --location
        #[arg(short, long)]
        role: Option<Role>,
    },

    /// Force a coordinated access token refresh
    Refresh {
        #[arg(short, long)]
        role: Option<Role>,
    },

    /// Show the role resolved for --location
    Whoami,

    /// Print the route table
    Routes,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected `key=value`, got `{s}`")),
    }
}

fn parse_method(s: &str) -> Result<Method, String> {
    Method::from_bytes(s.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}
