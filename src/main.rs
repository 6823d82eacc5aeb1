use std::env;
use std::process;

use tracing_subscriber::EnvFilter;

use cowbt::{Config, CowError, CowTree, InsertFlags, Result};

const USAGE: &str = "usage: cowbt [-r] <file> <command> [args]

commands:
  put <key> <value>   store a value
  new <key> <value>   store a value, failing if the key exists
  get <key>           print the value of a key
  del <key>           delete a key
  scan [start]        print every key and value, optionally from a key
  compact             rewrite the file without unused pages
  revert              drop the last commit
  stat                print tree statistics

options:
  -r                  keys compare from their last byte";

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let reverse = args.first().map(|a| a == "-r").unwrap_or(false);
    if reverse {
        args.remove(0);
    }
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        process::exit(2);
    }

    match run(&args[0], &args[1], &args[2..], reverse) {
        Ok(()) => {}
        Err(CowError::NotFound) => {
            eprintln!("not found");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn run(path: &str, command: &str, args: &[String], reverse: bool) -> Result<()> {
    let arg = |i: usize| -> Result<&[u8]> {
        args.get(i)
            .map(|a| a.as_bytes())
            .ok_or_else(|| CowError::InvalidArgument(format!("{} needs more arguments", command)))
    };

    let read_only = matches!(command, "get" | "scan" | "stat");
    let config = Config::new().reverse_keys(reverse).read_only(read_only);
    let mut tree = CowTree::open(path, config)?;

    match command {
        "put" => tree.insert(None, arg(0)?, arg(1)?, InsertFlags::NONE),
        "new" => tree.insert(None, arg(0)?, arg(1)?, InsertFlags::NO_OVERWRITE),
        "get" => {
            let value = tree.at(None, arg(0)?)?;
            println!("{}", String::from_utf8_lossy(&value));
            Ok(())
        }
        "del" => tree.remove(None, arg(0)?),
        "scan" => {
            let iter = match args.first() {
                Some(start) => tree.range_from(None, start.as_bytes())?,
                None => tree.iter(None)?,
            };
            for item in iter {
                let (key, value) = item?;
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
            Ok(())
        }
        "compact" => tree.compact(),
        "revert" => tree.revert(),
        "stat" => {
            let stat = tree.stat()?;
            println!("page size:      {}", stat.page_size);
            println!("depth:          {}", stat.depth);
            println!("entries:        {}", stat.entries);
            println!("branch pages:   {}", stat.branch_pages);
            println!("leaf pages:     {}", stat.leaf_pages);
            println!("overflow pages: {}", stat.overflow_pages);
            println!("revisions:      {}", stat.revisions);
            println!("created at:     {}", stat.created_at);
            println!("cache:          {}/{} pages", stat.cache_size, stat.max_cache);
            println!("reads:          {} ({} hits)", stat.reads, stat.hits);
            Ok(())
        }
        other => Err(CowError::InvalidArgument(format!("unknown command {}", other))),
    }
}
