use capgraph_core::DEFAULT_POLL_INTERVAL;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Capability and enabler documents kept in sync on disk"
)]
pub struct Cli {
    /// Path to the capgraph.yaml config (defaults to CAPGRAPH_CONFIG, then ./capgraph.yaml)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum CapabilityCommand {
    /// Create a capability from the template
    Add {
        /// Name of the capability
        #[clap(long)]
        name: Option<String>,

        /// Purpose paragraph
        #[clap(long)]
        description: Option<String>,

        /// Status (defaults to Draft)
        #[clap(long)]
        status: Option<String>,

        /// Approval (not approved, pending, approved)
        #[clap(long)]
        approval: Option<String>,

        /// Priority (high, medium, low)
        #[clap(long)]
        priority: Option<String>,

        #[clap(long)]
        owner: Option<String>,

        #[clap(long)]
        system: Option<String>,

        #[clap(long)]
        component: Option<String>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// Edit capability metadata or its internal dependencies
    Edit {
        /// The CAP- id of the capability
        id: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        approval: Option<String>,

        #[clap(long)]
        priority: Option<String>,

        #[clap(long)]
        owner: Option<String>,

        #[clap(long)]
        system: Option<String>,

        #[clap(long)]
        component: Option<String>,

        /// Replace upstream dependencies: comma separated `CAP-ID[:description]`, empty to clear
        #[clap(long)]
        upstream: Option<String>,

        /// Replace downstream impacts: comma separated `CAP-ID[:description]`, empty to clear
        #[clap(long)]
        downstream: Option<String>,
    },

    /// Copy a capability and all of its enablers under new ids
    Copy {
        /// The CAP- id to copy
        id: String,

        /// Name of the copy
        #[clap(long)]
        name: String,
    },

    /// Delete a capability, detaching its enablers and dependents
    Del {
        id: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum EnablerCommand {
    /// Create an enabler, optionally under a capability
    Add {
        /// Name of the enabler
        #[clap(long)]
        name: Option<String>,

        /// Parent capability id
        #[clap(long, short = 'c')]
        capability: Option<String>,

        /// Description shown in the parent's enabler table
        #[clap(long)]
        description: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        approval: Option<String>,

        #[clap(long)]
        priority: Option<String>,

        #[clap(long)]
        owner: Option<String>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// Edit enabler metadata; the parent's row follows
    Edit {
        /// The ENB- id of the enabler
        id: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        description: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        approval: Option<String>,

        #[clap(long)]
        priority: Option<String>,
    },

    /// Move an enabler to another capability
    Move {
        id: String,

        /// New parent capability id
        #[clap(long, short = 'c', conflicts_with = "detach")]
        capability: Option<String>,

        /// Leave the enabler without a parent
        #[clap(long)]
        detach: bool,
    },

    /// Add a functional (or, with --type, non-functional) requirement
    Req {
        /// The ENB- id of the enabler
        id: String,

        #[clap(long)]
        name: String,

        /// Requirement text
        #[clap(long)]
        text: String,

        /// Non-functional category (Performance, Security, ...)
        #[clap(long)]
        r#type: Option<String>,

        #[clap(long)]
        priority: Option<String>,
    },

    /// Delete an enabler and remove it from its capability
    Del {
        id: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List capabilities and enablers
    List {
        /// Only capabilities
        #[clap(long, conflicts_with = "enablers")]
        capabilities: bool,

        /// Only enablers
        #[clap(long)]
        enablers: bool,

        /// Filter by status
        #[clap(long)]
        status: Option<String>,
    },

    /// Show a document
    Show {
        /// CAP- or ENB- id
        id: String,

        /// Print the file as stored instead of the enhanced view
        #[clap(long)]
        raw: bool,
    },

    /// Parse a markdown file and print it as JSON
    Parse {
        file: PathBuf,

        /// Document type (capability, enabler); detected when omitted
        #[clap(long, short = 't')]
        r#type: Option<String>,
    },

    /// Allocate a fresh id without creating a document
    Allocate {
        /// CAP, ENB, FR or NFR
        prefix: String,
    },

    /// Capability commands
    #[clap(subcommand)]
    Cap(CapabilityCommand),

    /// Enabler commands
    #[clap(subcommand)]
    Enb(EnablerCommand),

    /// Report broken cross-document references
    Check,

    /// Restore enabler rows and dependency mirrors from the documents
    Repair,

    /// Export the document graph
    Export {
        /// Output format (json, overview)
        #[clap(long, short = 'f', default_value = "json")]
        format: String,

        /// Output file path
        #[clap(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print changes made to the documents until interrupted
    Watch {
        /// Poll interval in seconds
        #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        interval: u64,
    },
}
