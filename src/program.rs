//! Program files: one instruction per line, grouped under `[core N]` headers.
//!
//! ```text
//! # producer
//! [core 0]
//! li r2, 42
//! store r2, 0x100(r0)
//!
//! [memory]
//! 0x200 = 7
//! ```

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};
use common::util::{parse_int, parse_size};
use smp::Instruction;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProgramFile {
    pub cores: BTreeMap<usize, Vec<Instruction>>,
    /// Words written to memory before the run, as `(address, value)`
    pub memory: Vec<(u64, u64)>,
}

enum Section {
    Core(usize),
    Memory,
}

pub fn parse(text: &str) -> anyhow::Result<ProgramFile> {
    let mut program = ProgramFile::default();
    let mut section = Section::Core(0);

    for (index, line) in text.lines().enumerate() {
        let number = index + 1;
        let line = match line.split_once('#') {
            Some((code, _comment)) => code,
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let header = header
                .strip_suffix(']')
                .ok_or_else(|| anyhow!("line {}: unterminated section header", number))?
                .trim();
            section = parse_header(header).with_context(|| format!("line {}", number))?;
            continue;
        }

        match section {
            Section::Core(core) => {
                let instruction: Instruction = line.parse().with_context(|| format!("line {}: `{}`", number, line))?;
                program.cores.entry(core).or_default().push(instruction);
            }
            Section::Memory => {
                let entry = parse_memory_line(line).with_context(|| format!("line {}: `{}`", number, line))?;
                program.memory.push(entry);
            }
        }
    }
    Ok(program)
}

fn parse_header(header: &str) -> anyhow::Result<Section> {
    if header.eq_ignore_ascii_case("memory") {
        return Ok(Section::Memory);
    }
    let mut words = header.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(kind), Some(id), None) if kind.eq_ignore_ascii_case("core") => {
            let core = id.parse().with_context(|| format!("`{}` is not a core number", id))?;
            Ok(Section::Core(core))
        }
        _ => bail!("unknown section `[{}]`", header),
    }
}

fn parse_memory_line(line: &str) -> anyhow::Result<(u64, u64)> {
    let (address, value) = line
        .split_once('=')
        .ok_or_else(|| anyhow!("expected `ADDRESS = VALUE`"))?;
    let address = parse_size(address.trim()).context("bad address")?;
    let value = parse_int(value.trim()).context("bad value")?;
    Ok((address, value as u64))
}
