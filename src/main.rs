use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use binom_fvm::{FileVirtualMemoryController, NodeDescriptor, VarType};

/// Opens (or creates) the database file named on the command line, exercises
/// the node/heap allocators once each, and prints a short summary. No
/// subcommands or flags: this binary is a smoke test, not an operator tool.
fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("binom-fvm: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let mut args = env::args_os().skip(1);
    let path = args
        .next()
        .context("usage: binom-fvm <database-file>")?;

    let ctrl = FileVirtualMemoryController::open(&path)
        .with_context(|| format!("opening {}", path.to_string_lossy()))?;

    let heap_index = ctrl
        .alloc_heap(64)
        .context("allocating a 64-byte heap region")?;
    let payload = b"binom smoke test payload";
    ctrl.write_heap(heap_index, payload)
        .context("writing heap payload")?;

    let root = NodeDescriptor {
        r#type: VarType::Ui8Array,
        size: 64,
        index: heap_index,
    };
    let node_index = ctrl
        .alloc_node(root)
        .context("allocating the root node")?;

    let mut read_back = vec![0u8; payload.len()];
    ctrl.read_heap(heap_index, payload.len() as u64, &mut read_back)
        .context("reading heap payload back")?;

    println!("opened {}", path.to_string_lossy());
    println!("root node virtual index: {node_index}");
    println!("heap region virtual index: {heap_index}, capacity now {} bytes", ctrl.heap_capacity());
    println!(
        "heap round-trip ok: {}",
        read_back == payload
    );

    Ok(())
}
