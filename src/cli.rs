use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use declarative::DriftPolicy;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and apply declarative infrastructure documents", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project directory (holds strata.toml, schemas and state)
    #[arg(short = 'C', long, global = true, env = "STRATA_DIR", default_value = ".")]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a document against the schemas and its reference graph
    Validate(DocArgs),

    /// Show what apply would change
    Plan(PlanArgs),

    /// Converge infrastructure to the document
    Apply(ApplyArgs),

    /// Destroy everything recorded in state
    Destroy(ApplyArgs),

    /// Show the dependency graph
    Graph(GraphArgs),

    /// Show outputs from the last apply
    Output(OutputArgs),

    /// Inspect or edit recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared arguments
// ============================================================================

#[derive(Args, Clone)]
pub struct DocArgs {
    /// Declaration document (TOML or JSON)
    #[arg(short, long, default_value = "main.toml")]
    pub file: PathBuf,
}

#[derive(Args, Clone, Default)]
pub struct VarArgs {
    /// Set a variable (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Load variables from a TOML or JSON file (repeatable)
    #[arg(long = "var-file", value_name = "PATH")]
    pub var_files: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DriftArg {
    Fail,
    Reconcile,
    Ignore,
}

impl From<DriftArg> for DriftPolicy {
    fn from(arg: DriftArg) -> Self {
        match arg {
            DriftArg::Fail => Self::Fail,
            DriftArg::Reconcile => Self::Reconcile,
            DriftArg::Ignore => Self::Ignore,
        }
    }
}

// ============================================================================
// Plan / Apply
// ============================================================================

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub doc: DocArgs,

    #[command(flatten)]
    pub vars: VarArgs,

    /// Limit to resources matching kind or kind.name (repeatable)
    #[arg(short, long)]
    pub target: Vec<String>,

    /// Plan destruction of everything in state
    #[arg(long)]
    pub destroy: bool,

    /// What to do when live resources diverge from state
    #[arg(long, value_enum)]
    pub drift: Option<DriftArg>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub doc: DocArgs,

    #[command(flatten)]
    pub vars: VarArgs,

    /// Limit to resources matching kind or kind.name (repeatable)
    #[arg(short, long)]
    pub target: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Number of resources changed in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// What to do when live resources diverge from state
    #[arg(long, value_enum)]
    pub drift: Option<DriftArg>,
}

// ============================================================================
// Graph / Output
// ============================================================================

#[derive(Args)]
pub struct GraphArgs {
    #[command(flatten)]
    pub doc: DocArgs,

    /// Print Graphviz DOT instead of apply waves
    #[arg(long)]
    pub dot: bool,
}

#[derive(Args)]
pub struct OutputArgs {
    /// Show a single output; sensitive values are revealed
    pub name: Option<String>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// State Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show one recorded resource
    Show {
        /// Resource address (kind.name)
        address: String,
    },

    /// Forget a resource without destroying it
    Rm {
        /// Resource address (kind.name)
        address: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show or release the state lock
    Unlock {
        /// Remove the lock even though another process may hold it
        #[arg(long)]
        force: bool,
    },
}
