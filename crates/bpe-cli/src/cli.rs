use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bpe", version, about = "Background Process Engine demo CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a script and block until it reaches a terminal state, printing
    /// its output as it becomes available.
    Run {
        script: String,
        #[arg(long, default_value = "default")]
        workspace: String,
        #[arg(long)]
        cwd: Option<String>,
    },
    /// Start a script in the background and print its process id.
    Start {
        script: String,
        #[arg(long, default_value = "default")]
        workspace: String,
        #[arg(long)]
        cwd: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// List processes for a workspace.
    List {
        #[arg(long, default_value = "default")]
        workspace: String,
    },
    /// Print a process's accumulated output.
    Tail {
        id: String,
        #[arg(long, default_value_t = 65536)]
        bytes: usize,
    },
    /// Request termination of a running process.
    Kill { id: String },
    /// Remove a terminal process's record and scratch files.
    Dispose { id: String },
}
