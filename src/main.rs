//! pharmacy-portal: command-line front end for the portal's data store.
//!
//! Usage: pharmacy-portal <command> [args]
//! Log level comes from `RUST_LOG` (default `info`), written to stderr.

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use pharmacy_portal::store::ExportOutcome;
use pharmacy_portal::{Config, DataStore, Record, StorageEvent, StorageMode, Table};

const USAGE: &str = "\
Usage: pharmacy-portal <command> [args]

Commands:
  status                          Active mode and record counts
  list <table>                    Print every record as JSON lines
  get <table> <id>                Print one record
  add <table> <json>              Create a record
  update <table> <id> <json>      Merge fields into a record
  delete <table> <id>             Delete a record
  mode [local|server|sheets]      Show or switch the storage mode
  connect-sheets <url>            Connect a spreadsheet script and switch to it
  disconnect-sheets               Forget the spreadsheet, continue locally
  init-sheets                     Create the sheets with their headers
  export-sheets                   Overwrite every sheet with local data
  watch                           Follow sync notifications until Ctrl-C
  config                          Print an example configuration

Tables: medicines, announcements, shifts, employees";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value.as_str()),
        None => bail!("missing <{}>\n\n{}", what, USAGE),
    }
}

fn parse_record(json: &str) -> Result<Record> {
    serde_json::from_str(json).context("record must be a JSON object")
}

fn print_record(record: &Record) -> Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    if matches!(command, "help" | "-h" | "--help") {
        println!("{USAGE}");
        return Ok(());
    }
    if command == "config" {
        print!("{}", Config::example_config());
        return Ok(());
    }

    init_logging();
    let config = Config::load()?;
    let store = DataStore::from_config(config)?;
    store.start().await;

    let result = run(&store, command, &args).await;
    store.shutdown().await;
    result
}

async fn run(store: &DataStore, command: &str, args: &[String]) -> Result<()> {
    match command {
        "status" => {
            println!("mode:      {} ({})", store.mode(), store.mode_name());
            println!("preferred: {}", store.preferred_mode());
            if let Some(url) = store.sheets_url() {
                println!("sheets:    {url}");
            }
            for table in Table::ALL {
                println!("{:<14} {}", table.as_str(), store.get_all(table).len());
            }
        }
        "list" => {
            let table: Table = arg(args, 1, "table")?.parse()?;
            for record in store.get_all(table) {
                print_record(&record)?;
            }
        }
        "get" => {
            let table: Table = arg(args, 1, "table")?.parse()?;
            let id = arg(args, 2, "id")?;
            match store.get_by_id(table, id) {
                Some(record) => print_record(&record)?,
                None => bail!("no {} record with id {}", table, id),
            }
        }
        "add" => {
            let table: Table = arg(args, 1, "table")?.parse()?;
            let record = parse_record(arg(args, 2, "json")?)?;
            print_record(&store.create(table, record))?;
        }
        "update" => {
            let table: Table = arg(args, 1, "table")?.parse()?;
            let id = arg(args, 2, "id")?;
            let changes = parse_record(arg(args, 3, "json")?)?;
            match store.update(table, id, changes) {
                Some(record) => print_record(&record)?,
                None => bail!("no {} record with id {}", table, id),
            }
        }
        "delete" => {
            let table: Table = arg(args, 1, "table")?.parse()?;
            let id = arg(args, 2, "id")?;
            if !store.delete(table, id) {
                bail!("no {} record with id {}", table, id);
            }
            println!("deleted {id}");
        }
        "mode" => match args.get(1) {
            None => println!("{} ({})", store.mode(), store.mode_name()),
            Some(mode) => {
                let mode: StorageMode = mode.parse()?;
                store.switch_mode(mode).await?;
                println!("switched to {}", store.mode_name());
            }
        },
        "connect-sheets" => {
            let url = arg(args, 1, "url")?;
            store.connect_to_sheets(url).await?;
            println!("connected: {}", store.mode_name());
        }
        "disconnect-sheets" => {
            store.disconnect_sheets().await?;
            println!("disconnected; now {}", store.mode_name());
        }
        "init-sheets" => {
            let init = store.init_sheets().await?;
            println!("{}", init.message);
            if !init.created.is_empty() {
                println!("created: {}", init.created.join(", "));
            }
        }
        "export-sheets" => {
            let outcomes = store.export_to_sheets().await?;
            let mut failed = 0;
            for ExportOutcome { table, result } in &outcomes {
                match result {
                    Ok(count) => println!("{:<14} {} rows", table.as_str(), count),
                    Err(e) => {
                        failed += 1;
                        println!("{:<14} failed: {}", table.as_str(), e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} tables failed to export", failed, outcomes.len());
            }
        }
        "watch" => watch(store).await?,
        other => bail!("unknown command: {}\n\n{}", other, USAGE),
    }
    Ok(())
}

async fn watch(store: &DataStore) -> Result<()> {
    if store.mode() == StorageMode::Local {
        println!("local mode: nothing to watch");
        return Ok(());
    }
    let mut events = store.subscribe();
    println!("watching {} (Ctrl-C to stop)", store.mode_name());
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(StorageEvent::DataSync { table }) => {
                    println!("{} updated ({} records)", table, store.get_all(table).len());
                }
                Ok(StorageEvent::ModeChanged { mode }) => println!("mode changed: {mode}"),
                Ok(StorageEvent::Ready { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} notifications", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
