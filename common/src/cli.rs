use clap::{ArgAction, Args};

use crate::util::parse_size;

/// Shape of the simulated machine.
#[derive(Debug, Clone, Args)]
#[clap(next_help_heading = "Machine Options")]
pub struct MachineOpts {
    /// Number of cores, each with its own private cache bank
    #[arg(long, default_value_t = 2)]
    pub cores: usize,

    /// Sets per cache bank
    #[arg(long, default_value_t = 16)]
    pub sets: usize,

    /// Ways per set
    #[arg(long, default_value_t = 2)]
    pub ways: usize,

    /// Cache line size, in 8-byte words
    #[arg(long, default_value_t = 4)]
    pub line_size: usize,

    /// Size of backing memory in bytes (decimal or 0x-prefixed)
    #[arg(long, default_value = "0x10000", value_parser = parse_size)]
    pub memory_size: u64,

    /// Cycles for backing memory to supply or accept a line
    #[arg(long, default_value_t = 10)]
    pub memory_latency: u32,
}

/// How the driver steps the simulation and what it prints.
#[derive(Debug, Clone, Args)]
#[clap(next_help_heading = "Run Options")]
pub struct RunOpts {
    /// Give up after this many cycles
    #[arg(long, default_value_t = 100_000)]
    pub max_cycles: u64,

    /// Print the report of every cycle
    #[arg(long)]
    pub trace: bool,

    /// Stop at the first fault instead of acknowledging it and continuing
    #[arg(long)]
    pub stop_on_fault: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = ArgAction::Count)]
    pub verbose: u8,
}
