//! ArcStore - interactive shell
//!
//! Drives transactions by hand against a data directory. Useful for poking
//! at block contents and inspecting the log after a crash.

use std::env;

use anyhow::{anyhow, bail, Context};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use arcstore::transaction::LogRecord;
use arcstore::{BlockId, Database, StorageConfig, Transaction};

/// Print help message
fn print_help() {
    println!(
        r#"
Transaction commands:
  begin                              Start a transaction
  commit                             Commit the current transaction
  rollback                           Roll back the current transaction
  pin <file> <block>                 Pin a block
  unpin <file> <block>               Unpin a block
  getint <file> <block> <offset>     Read an integer
  setint <file> <block> <offset> <value>
  getstr <file> <block> <offset>     Read a string
  setstr <file> <block> <offset> <text...>
  append <file>                      Append a block to a file
  size <file>                        Number of blocks in a file

Other commands:
  .help                              Show this help message
  .log [n]                           Show the newest n log records (default 20)
  .stats                             Buffer pool and I/O counters
  .config                            Show the active configuration
  .quit                              Exit (rolls back an open transaction)
"#
    );
}

fn parse_args() -> anyhow::Result<StorageConfig> {
    let args: Vec<String> = env::args().collect();
    let mut config = StorageConfig::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--config" | "-c" => {
                let path = value.context("--config needs a path")?;
                config = StorageConfig::from_json_file(path)?;
            }
            "--dir" | "-d" => {
                config = config.data_dir(value.context("--dir needs a path")?);
            }
            "--block-size" => {
                let size = value.context("--block-size needs a value")?.parse()?;
                config = config.block_size(size);
            }
            "--buffers" => {
                let count = value.context("--buffers needs a value")?.parse()?;
                config = config.buffer_pool_size(count);
            }
            other => bail!("unknown argument '{}'", other),
        }
        i += 2;
    }
    Ok(config)
}

fn block_arg(args: &[&str]) -> anyhow::Result<BlockId> {
    match args {
        [file, number, ..] => Ok(BlockId::new(*file, number.parse()?)),
        _ => bail!("expected <file> <block>"),
    }
}

fn offset_arg(args: &[&str]) -> anyhow::Result<usize> {
    Ok(args.get(2).context("expected <offset>")?.parse()?)
}

fn active(tx: &mut Option<Transaction>) -> anyhow::Result<&mut Transaction> {
    tx.as_mut()
        .ok_or_else(|| anyhow!("no active transaction; use 'begin'"))
}

/// Handle one transaction command
fn execute(db: &Database, current: &mut Option<Transaction>, line: &str) -> anyhow::Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((cmd, args)) = parts.split_first() else {
        return Ok(());
    };

    match *cmd {
        "begin" => {
            if current.is_some() {
                bail!("a transaction is already active");
            }
            let tx = db.begin()?;
            println!("Transaction {} started", tx.id());
            *current = Some(tx);
        }
        "commit" => {
            let tx = current.take().context("no active transaction")?;
            let id = tx.id();
            tx.commit()?;
            println!("Transaction {} committed", id);
        }
        "rollback" => {
            let tx = current.take().context("no active transaction")?;
            let id = tx.id();
            tx.rollback()?;
            println!("Transaction {} rolled back", id);
        }
        "pin" => active(current)?.pin(&block_arg(args)?)?,
        "unpin" => active(current)?.unpin(&block_arg(args)?)?,
        "getint" => {
            let value = active(current)?.get_int(&block_arg(args)?, offset_arg(args)?)?;
            println!("{}", value);
        }
        "setint" => {
            let value: i32 = args.get(3).context("expected <value>")?.parse()?;
            active(current)?.set_int(&block_arg(args)?, offset_arg(args)?, value)?;
        }
        "getstr" => {
            let value = active(current)?.get_string(&block_arg(args)?, offset_arg(args)?)?;
            println!("{:?}", value);
        }
        "setstr" => {
            let text = args.get(3..).map(|rest| rest.join(" ")).unwrap_or_default();
            active(current)?.set_string(&block_arg(args)?, offset_arg(args)?, &text)?;
        }
        "append" => {
            let file = args.first().context("expected <file>")?;
            let block = active(current)?.append(file)?;
            println!("{}", block);
        }
        "size" => {
            let file = args.first().context("expected <file>")?;
            println!("{}", active(current)?.size(file)?);
        }
        other => bail!("unknown command '{}'; type '.help'", other),
    }
    Ok(())
}

fn show_log(db: &Database, limit: usize) -> anyhow::Result<()> {
    for item in db.log().iterator()?.take(limit) {
        let (lsn, bytes) = item?;
        match LogRecord::from_bytes(&bytes) {
            Ok(record) => println!("{:>8}  {}", lsn, record),
            Err(e) => println!("{:>8}  <unreadable: {}>", lsn, e),
        }
    }
    Ok(())
}

fn show_stats(db: &Database) {
    let pool = db.buffer_pool();
    let io = db.disk().stats();
    println!("buffers available: {}/{}", pool.available(), pool.pool_size());
    println!("blocks read:       {}", io.blocks_read);
    println!("blocks written:    {}", io.blocks_written);
    println!("latest lsn:        {}", db.log().latest_lsn());
    println!("durable lsn:       {}", db.log().last_saved_lsn());
}

/// Handle special dot commands. Returns false when the shell should exit.
fn handle_special_command(db: &Database, cmd: &str) -> anyhow::Result<bool> {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    match parts.first().copied() {
        Some(".help") => print_help(),
        Some(".quit") | Some(".exit") => return Ok(false),
        Some(".log") => {
            let limit = match parts.get(1) {
                Some(n) => n.parse()?,
                None => 20,
            };
            show_log(db, limit)?;
        }
        Some(".stats") => show_stats(db),
        Some(".config") => println!("{}", serde_json::to_string_pretty(db.config())?),
        Some(other) => bail!("unknown command '{}'; type '.help'", other),
        None => {}
    }
    Ok(true)
}

/// Main REPL loop
fn run_repl(db: &Database) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut current: Option<Transaction> = None;

    println!("ArcStore shell. Type '.help' for help, '.quit' to exit");

    loop {
        let prompt = match &current {
            Some(tx) => format!("arcstore[tx {}]> ", tx.id()),
            None => "arcstore> ".to_string(),
        };
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        editor.add_history_entry(trimmed)?;

        let result = if trimmed.starts_with('.') {
            match handle_special_command(db, trimmed) {
                Ok(true) => Ok(()),
                Ok(false) => break,
                Err(e) => Err(e),
            }
        } else {
            execute(db, &mut current, trimmed)
        };
        if let Err(e) = result {
            eprintln!("Error: {:#}", e);
        }
    }

    if let Some(tx) = current.take() {
        println!("Rolling back transaction {}", tx.id());
        tx.rollback()?;
    }
    println!("Goodbye!");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args()?;
    let db = Database::open_and_recover(config).context("failed to open database")?;
    run_repl(&db)
}
