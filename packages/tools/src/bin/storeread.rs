use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use vstore_core::StoreFlags;

/// Read a range of a store, or describe it
#[derive(Parser, Debug)]
#[command(name = "storeread")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Build the store from a JSON description instead of a name
    #[arg(long, short = 'c', value_name = "FILE", conflicts_with = "name")]
    config: Option<PathBuf>,

    /// Print the store's layout as JSON instead of its contents
    #[arg(long)]
    json: bool,

    /// Store to read (TYPE:NAME)
    name: Option<String>,

    /// First block to read
    #[arg(long, short = 'a', default_value_t = 0)]
    addr: i64,

    /// Bytes to read (default: to the end)
    #[arg(long, short = 'n')]
    len: Option<u64>,
}

fn run(args: Args) -> anyhow::Result<()> {
    let classes = vstore_tools::registry()?;
    let store = match (&args.config, &args.name) {
        (Some(path), _) => vstore_tools::open_config(&classes, path)?,
        (None, Some(name)) => {
            vstore_tools::open_names(&classes, std::slice::from_ref(name), None, StoreFlags::READONLY)?
        }
        (None, None) => bail!("need a store name or --config"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&store.describe())?);
        return Ok(());
    }

    let mut out = BufWriter::new(io::stdout().lock());
    vstore_tools::dump(&store, args.addr, args.len, &mut out)?;
    Ok(())
}

fn main() {
    vstore_tools::init_logging();

    if let Err(e) = run(Args::parse()) {
        eprintln!("storeread: {:#}", e);
        std::process::exit(1);
    }
}
