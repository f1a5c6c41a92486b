use std::io::{self, BufWriter};

use clap::Parser;
use tracing::info;
use vstore_core::StoreFlags;

/// Write the contents of a store to stdout
///
/// Names are TYPE:NAME strings (a plain path is a file). Several names are
/// concatenated unless --interleave is given.
#[derive(Parser, Debug)]
#[command(name = "storecat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stripe the stores in chunks of this many bytes
    #[arg(long, short = 'I', value_name = "BYTES")]
    interleave: Option<u64>,

    /// Only output these blocks (START+LEN,...)
    #[arg(long, short = 'r', value_name = "RUNS")]
    remap: Option<String>,

    /// Stores to read
    #[arg(required = true, value_name = "NAME")]
    names: Vec<String>,
}

fn run(args: Args) -> anyhow::Result<()> {
    let classes = vstore_tools::registry()?;
    let mut store =
        vstore_tools::open_names(&classes, &args.names, args.interleave, StoreFlags::READONLY)?;
    if let Some(list) = &args.remap {
        store = vstore_tools::remap(store, list)?;
    }

    let mut out = BufWriter::new(io::stdout().lock());
    let written = vstore_tools::dump(&store, 0, None, &mut out)?;
    info!(bytes = written, "done");
    Ok(())
}

fn main() {
    vstore_tools::init_logging();

    if let Err(e) = run(Args::parse()) {
        eprintln!("storecat: {:#}", e);
        std::process::exit(1);
    }
}
