use anyhow::Context;
use colored::Colorize;
use sdb_store::{SaveFile, StoreConfig};
use serde_json::Value;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Ctx::new(&cli)?;
    match cli.command {
        Command::List => cmd_list(&ctx),
        Command::Create(args) => cmd_create(&ctx, args),
        Command::Keys(args) => cmd_keys(&ctx, args),
        Command::Get(args) => cmd_get(&ctx, args),
        Command::Set(args) => cmd_set(&ctx, args),
        Command::Delete(args) => cmd_delete(&ctx, args),
        Command::Drop(args) => cmd_drop(&ctx, args),
    }
}

struct Ctx {
    dir: std::path::PathBuf,
    config: StoreConfig,
}

impl Ctx {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        let config = match &cli.config {
            Some(path) => StoreConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => StoreConfig::default(),
        };
        Ok(Self {
            dir: cli.dir.clone(),
            config,
        })
    }

    fn open(&self, store: &str) -> anyhow::Result<SaveFile> {
        SaveFile::open_with_config(store, &self.dir, self.config.clone())
            .with_context(|| format!("opening store {store:?} in {}", self.dir.display()))
    }

    /// Open a store that must already exist.
    fn open_existing(&self, store: &str) -> anyhow::Result<SaveFile> {
        let stores = SaveFile::list_stores(&self.dir)?;
        if !stores.iter().any(|s| s == store) {
            anyhow::bail!("no store named {store:?} in {}", self.dir.display());
        }
        self.open(store)
    }
}

fn cmd_list(ctx: &Ctx) -> anyhow::Result<()> {
    let stores = SaveFile::list_stores(&ctx.dir)?;
    if stores.is_empty() {
        println!("No stores in {}.", ctx.dir.display());
    }
    for name in stores {
        println!("{}", name.bold());
    }
    Ok(())
}

fn cmd_create(ctx: &Ctx, args: StoreArgs) -> anyhow::Result<()> {
    if SaveFile::list_stores(&ctx.dir)?.contains(&args.store) {
        anyhow::bail!("store {:?} already exists", args.store);
    }
    ctx.open(&args.store)?.close()?;
    println!("{} Created store {}", "✓".green().bold(), args.store.yellow());
    Ok(())
}

fn cmd_keys(ctx: &Ctx, args: StoreArgs) -> anyhow::Result<()> {
    let mut save = ctx.open_existing(&args.store)?;
    let keys = save.list_keys()?;
    save.close()?;
    for key in &keys {
        println!("{key}");
    }
    println!("{}", format!("{} key(s)", keys.len()).dimmed());
    Ok(())
}

fn cmd_get(ctx: &Ctx, args: KeyArgs) -> anyhow::Result<()> {
    let mut save = ctx.open_existing(&args.store)?;
    let value: Option<Value> = save.try_get(&args.key)?;
    save.close()?;
    match value {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => anyhow::bail!("key {:?} not found in {:?}", args.key, args.store),
    }
    Ok(())
}

fn cmd_set(ctx: &Ctx, args: SetArgs) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(&args.value).context("value is not valid JSON")?;
    let mut save = ctx.open(&args.store)?;
    save.set(&args.key, &value)?;
    save.close()?;
    println!("{} Set {} in {}", "✓".green().bold(), args.key.cyan(), args.store.yellow());
    Ok(())
}

fn cmd_delete(ctx: &Ctx, args: KeyArgs) -> anyhow::Result<()> {
    let mut save = ctx.open_existing(&args.store)?;
    let existed = save.has_key(&args.key)?;
    save.delete(&args.key)?;
    save.close()?;
    if existed {
        println!("Deleted {} from {}", args.key.cyan(), args.store.yellow());
    } else {
        println!("{} was not set in {}", args.key.cyan(), args.store.yellow());
    }
    Ok(())
}

fn cmd_drop(ctx: &Ctx, args: StoreArgs) -> anyhow::Result<()> {
    SaveFile::delete_store(&args.store, &ctx.dir)
        .with_context(|| format!("deleting store {:?}", args.store))?;
    println!("{} Deleted store {}", "✓".green().bold(), args.store.yellow());
    Ok(())
}
