use clap::Parser;
use lumbung::engine::{Engine, EngineOptions};
use lumbung::types::{Uid, Xid};
use lumbung::version::transaction::IsolationLevel;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumbung", about = "Transactional record storage shell")]
struct Args {
    /// Database base path; <path>.db, <path>.log and <path>.xid are created
    /// next to each other.
    #[arg(default_value = "lumbung")]
    path: String,

    /// Page-cache memory budget in mebibytes.
    #[arg(long, default_value_t = 64)]
    cache_mb: u64,
}

fn parse_xid(token: &str) -> Option<Xid> {
    token.parse().ok()
}

fn parse_uid(token: &str) -> Option<Uid> {
    match token.strip_prefix("0x") {
        Some(hex) => Uid::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

fn process_command(engine: &Engine, line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let result = match tokens.as_slice() {
        ["exit"] | ["quit"] | ["q"] => return false,
        ["help"] | ["h"] => {
            println!(
                r#"
Available commands:
  begin [rc|rr]          - Start a transaction (read committed / repeatable read)
  commit <xid>           - Commit a transaction
  abort <xid>            - Roll back a transaction
  insert <xid> <text>    - Store a record, prints its uid
  read <xid> <uid>       - Read a record
  delete <xid> <uid>     - Delete a record
  help, h                - Show this help message
  exit, quit, q          - Leave the shell
"#
            );
            Ok(())
        }
        ["begin"] | ["begin", "rc"] => engine
            .begin(IsolationLevel::ReadCommitted)
            .map(|xid| println!("xid {xid}")),
        ["begin", "rr"] => engine
            .begin(IsolationLevel::RepeatableRead)
            .map(|xid| println!("xid {xid}")),
        ["commit", xid] => match parse_xid(xid) {
            Some(xid) => engine.commit(xid).map(|()| println!("committed")),
            None => {
                println!("bad xid: {xid}");
                Ok(())
            }
        },
        ["abort", xid] => match parse_xid(xid) {
            Some(xid) => engine.abort(xid).map(|()| println!("aborted")),
            None => {
                println!("bad xid: {xid}");
                Ok(())
            }
        },
        ["insert", xid, rest @ ..] if !rest.is_empty() => match parse_xid(xid) {
            Some(xid) => engine
                .insert(xid, rest.join(" ").as_bytes())
                .map(|uid| println!("uid {uid:#x}")),
            None => {
                println!("bad xid: {xid}");
                Ok(())
            }
        },
        ["read", xid, uid] => match (parse_xid(xid), parse_uid(uid)) {
            (Some(xid), Some(uid)) => engine.read(xid, uid).map(|data| match data {
                Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                None => println!("(no data)"),
            }),
            _ => {
                println!("bad arguments");
                Ok(())
            }
        },
        ["delete", xid, uid] => match (parse_xid(xid), parse_uid(uid)) {
            (Some(xid), Some(uid)) => engine.delete(xid, uid).map(|deleted| {
                println!("{}", if deleted { "deleted" } else { "nothing to delete" })
            }),
            _ => {
                println!("bad arguments");
                Ok(())
            }
        },
        [] => Ok(()),
        _ => {
            println!("unknown command, try 'help'");
            Ok(())
        }
    };

    if let Err(err) = result {
        println!("error: {err}");
    }
    true
}

fn main() -> rustyline::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let engine = Engine::new(
        &args.path,
        EngineOptions {
            memory: args.cache_mb << 20,
        },
    )
    .expect("failed to open database");

    println!("lumbung shell - 'help' lists commands");
    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline("lumbung> ") {
            Ok(line) => {
                let command = line.trim().to_string();
                if command.is_empty() {
                    continue;
                }
                rl.add_history_entry(&command)?;
                if !process_command(&engine, &command) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    if let Err(err) = engine.close() {
        println!("error closing database: {err}");
    }
    Ok(())
}
