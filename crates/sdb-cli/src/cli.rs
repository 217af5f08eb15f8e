use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sdb", about = "Inspect and edit sdb save files", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the save files
    #[arg(short, long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// TOML store configuration, used when a store is created
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the stores in the directory
    List,
    /// Create an empty store
    Create(StoreArgs),
    /// List the keys of a store
    Keys(StoreArgs),
    /// Print the value under a key as JSON
    Get(KeyArgs),
    /// Store a JSON value under a key
    Set(SetArgs),
    /// Remove a key
    Delete(KeyArgs),
    /// Delete a store and both of its backing files
    Drop(StoreArgs),
}

#[derive(Args)]
pub struct StoreArgs {
    pub store: String,
}

#[derive(Args)]
pub struct KeyArgs {
    pub store: String,
    pub key: String,
}

#[derive(Args)]
pub struct SetArgs {
    pub store: String,
    pub key: String,
    /// Value as a JSON document, e.g. '{"hp": 10}' or '"text"'
    pub value: String,
}
