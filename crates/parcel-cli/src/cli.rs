use clap::{ArgAction, Parser, Subcommand, ValueHint};

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}",
    arg_required_else_help = true
)]
pub struct Args {
    /// Set output verbosity
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress outputs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as json
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Disable progress spinners
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Provide custom config file
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<String>,

    /// Set proxy for registry requests
    #[arg(required = false, long, short = 'P', global = true)]
    pub proxy: Option<String>,

    /// Set registry request headers
    #[arg(required = false, long, short = 'H', global = true)]
    pub header: Option<Vec<String>>,

    /// Set user agent for registry requests
    #[arg(required = false, long, short = 'A', global = true)]
    pub user_agent: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a package and its sub-packages
    #[command(arg_required_else_help = true)]
    #[clap(name = "get", visible_alias = "g")]
    Get {
        /// Package location: `repo.git[/dir]@ref`, `oci://image[//dir]`, a directory, or `-` for a tar archive on stdin
        location: String,

        /// Destination directory. Defaults to the package directory or repository name
        #[arg(value_hint = ValueHint::DirPath)]
        dest: Option<String>,

        /// Replace the destination if it already exists
        #[arg(required = false, long)]
        clean: bool,

        /// Abort the fetch after this long, e.g. 90s or 5m
        #[arg(required = false, long, short)]
        timeout: Option<String>,

        /// Fetch sibling sub-packages in parallel
        #[arg(required = false, long)]
        parallel: bool,
    },

    /// Show how a location is interpreted
    #[command(arg_required_else_help = true)]
    Parse {
        location: String,

        /// Treat `-` as standard input
        #[arg(required = false, long)]
        stdin: bool,

        /// Treat `-` as standard output
        #[arg(required = false, long)]
        stdout: bool,
    },

    /// List packages below a directory with their upstream
    Tree {
        #[arg(default_value = ".", value_hint = ValueHint::DirPath)]
        dir: String,
    },

    /// Print the configuration file to stdout
    Config,

    /// Generate default config
    #[clap(name = "defconfig")]
    DefConfig,

    /// View env
    Env,
}
