//! Stub table inspection tool.
//!
//! Lists the stubs registered for an architecture and, given a runtime-checked
//! feature list, which variant capability dispatch selects for each key.

use std::process::ExitCode;

use clap::Parser;

use tpde_intrinsics::stubs::{StubDescriptor, StubRegistry};
use tpde_intrinsics::target::{Architecture, CpuFeatureSet};

#[derive(Parser)]
#[command(name = "stubtable")]
#[command(version = "0.1.0")]
#[command(about = "List intrinsic stubs and their capability dispatch")]
struct Cli {
    /// Target architecture (amd64 or aarch64).
    #[arg(long, default_value = "amd64")]
    arch: String,

    /// Comma-separated runtime-checked features, e.g. "avx2,bmi2".
    #[arg(long)]
    features: Option<String>,

    /// Only show keys of this family (indexOf, compareTo, equals, regionEquals,
    /// stringAttributes, aes, math, halfFloat).
    #[arg(long)]
    op: Option<String>,

    /// Print every variant instead of only the selected one.
    #[arg(long)]
    all: bool,
}

fn describe(stub: &StubDescriptor) -> String {
    let args: Vec<&str> = stub.args().iter().map(|kind| kind.name()).collect();
    let extra = if stub.is_default() {
        String::new()
    } else {
        format!(" requires [{}]", stub.additional())
    };
    format!("{}({}) -> {}{extra}", stub.name(), args.join(", "), stub.result().name())
}

fn run(cli: &Cli) -> Result<(), String> {
    let arch = Architecture::parse(&cli.arch).ok_or_else(|| format!("unknown architecture '{}'", cli.arch))?;
    let registry = StubRegistry::global(arch).map_err(|e| e.to_string())?;
    let checked = match &cli.features {
        Some(list) => Some(CpuFeatureSet::parse(arch, list).map_err(|e| e.to_string())?),
        None => None,
    };

    let mut shown = 0usize;
    for key in registry.keys() {
        if cli.op.as_deref().is_some_and(|op| op != key.family()) {
            continue;
        }
        shown += 1;
        if cli.all {
            println!("{key}:");
            for stub in registry.variants(key) {
                println!("    {}", describe(stub));
            }
            continue;
        }
        match registry.select(key, checked.as_ref()) {
            Ok(stub) => println!("{key}: {}", describe(stub)),
            Err(e) => println!("{key}: {e}"),
        }
    }

    if shown == 0 {
        return Err(match &cli.op {
            Some(op) => format!("no stub family named '{op}'"),
            None => "registry is empty".to_string(),
        });
    }
    log::info!("{shown} key(s) listed for {arch}, {} stubs registered", registry.len());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::FAILURE
        }
    }
}
