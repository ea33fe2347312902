use std::{fs, path::PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use common::cli::{MachineOpts, RunOpts};
use log::info;
use smp::{CacheConfig, SimConfig, Simulation, Timing};

mod program;

/// Cycle-level simulator of in-order cores sharing memory through MESI-coherent caches.
#[derive(Parser, Debug)]
#[clap(name = "mesi-sim", version)]
struct Cli {
    /// Program file: instructions under `[core N]` headers, plus an optional `[memory]` section
    program: PathBuf,

    #[clap(flatten)]
    machine: MachineOpts,

    #[clap(flatten)]
    run: RunOpts,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    common::init_logging(cli.run.verbose)?;

    let text = fs::read_to_string(&cli.program)
        .with_context(|| format!("reading {}", cli.program.display()))?;
    let program = program::parse(&text).with_context(|| format!("parsing {}", cli.program.display()))?;

    let config = SimConfig {
        cores: cli.machine.cores,
        cache: CacheConfig {
            sets: cli.machine.sets,
            ways: cli.machine.ways,
            line_size: cli.machine.line_size,
        },
        memory_size: cli.machine.memory_size,
        timing: Timing {
            memory_cycles: cli.machine.memory_latency,
            ..Default::default()
        },
        verify_invariants: true,
    };
    let mut sim = Simulation::with_config(config)?;

    for &(address, value) in &program.memory {
        sim.write_memory(address, value)
            .with_context(|| format!("initialising memory at {:#x}", address))?;
    }
    for (&core, instructions) in &program.cores {
        sim.load_program(core, instructions)?;
        info!("core {}: {} instructions", core, instructions.len());
    }

    let finished = run(&mut sim, &cli.run)?;

    println!("{}", sim.dump_stats());
    for core in 0..sim.num_cores() {
        let regs = sim.core(core)?.regs().values();
        let live: Vec<String> = regs
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .map(|(reg, value)| format!("r{}={}", reg, *value as i64))
            .collect();
        if !live.is_empty() {
            println!("core {}: {}", core, live.join(" "));
        }
    }

    if !finished {
        bail!("still running after {} cycles", cli.run.max_cycles);
    }
    Ok(())
}

/// Steps until idle. Returns false when the cycle limit ran out first.
fn run(sim: &mut Simulation, opts: &RunOpts) -> anyhow::Result<bool> {
    while !sim.is_idle() {
        if sim.cycle() >= opts.max_cycles {
            return Ok(false);
        }
        let report = sim.step()?;
        if opts.trace {
            println!("{}", report);
        }
        for fault in &report.faults {
            eprintln!("fault: {}", fault);
            if opts.stop_on_fault {
                eprint!("{}", sim.state_dump());
                bail!("stopped on fault at core {} pc {}", fault.core, fault.pc);
            }
            sim.acknowledge_fault(fault.core)?;
        }
    }
    Ok(true)
}
