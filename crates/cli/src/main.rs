//! # CLI - CrestKV Interactive Shell
//!
//! A REPL-style command-line interface for the CrestKV storage engine.
//! Reads commands from stdin, executes them against the store, and prints
//! results to stdout. Works both interactively and scripted (pipe commands
//! via stdin).
//!
//! ## Commands
//!
//! ```text
//! put <key> <value>   Insert or update a key-value pair
//! get <key>           Look up a key (prints the value or "(nil)")
//! del <key>           Delete a key
//! exit                Shut down gracefully
//! ```
//!
//! The data directory is the first positional argument, defaulting to
//! `./data`. No environment variables are consumed.
//!
//! ## Example
//!
//! ```text
//! $ crestkv /tmp/db
//! CrestKV started (data_dir=/tmp/db)
//! > put name Alice
//! OK
//! > get name
//! Alice
//! > exit
//! bye
//! ```

use anyhow::{Context, Result};
use engine::{LsmStore, StoreConfig};
use std::io::{self, BufRead, Write};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::INFO)
        .with_writer(io::stderr)
        .init();

    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "./data".to_string());

    let store = LsmStore::open(StoreConfig::new(&data_dir))
        .with_context(|| format!("failed to open store at {}", data_dir))?;

    println!("CrestKV started (data_dir={})", data_dir);
    println!("Commands: put <key> <value> | get <key> | del <key> | exit");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_lowercase().as_str() {
                "put" => match (parts.next(), parts.next(), parts.next()) {
                    (Some(key), Some(value), None) => match store.put(key, value) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR put failed: {}", e),
                    },
                    _ => println!("ERR usage: put <key> <value>"),
                },
                "get" => match (parts.next(), parts.next()) {
                    (Some(key), None) => match store.get(key) {
                        Ok(Some(value)) => println!("{}", value),
                        Ok(None) => println!("(nil)"),
                        Err(e) => println!("ERR read failed: {}", e),
                    },
                    _ => println!("ERR usage: get <key>"),
                },
                "del" => match (parts.next(), parts.next()) {
                    (Some(key), None) => match store.delete(key) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR del failed: {}", e),
                    },
                    _ => println!("ERR usage: del <key>"),
                },
                "exit" | "quit" => {
                    store.close()?;
                    println!("bye");
                    return Ok(());
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    // stdin closed without an explicit exit: still shut down cleanly.
    store.close()?;
    Ok(())
}
