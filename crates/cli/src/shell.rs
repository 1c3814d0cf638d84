//! Command interpreter behind `recoveryctl`.
//!
//! Each command names streams as `addr@path`, where `addr` is the owning
//! node (`host:port:group`) and `path` is the backing file. Relative paths
//! resolve against the configured working directory.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use config::RecoveryConfig;
use stream::{Address, RecordStream};

/// Records printed by `INSPECT` when no count is given.
const DEFAULT_INSPECT_COUNT: usize = 10;

/// Whether the read loop should keep going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    config: RecoveryConfig,
}

impl Shell {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Runs one input line, writing replies to `out`.
    ///
    /// Command failures are reported as `ERR ...` lines; only a failure to
    /// write to `out` is returned as an error.
    pub fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<Flow> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(Flow::Continue);
        };
        let args: Vec<&str> = parts.collect();

        let result = match cmd.to_uppercase().as_str() {
            "INSPECT" => self.inspect(&args, out),
            "SORT" => self.sort(&args, out),
            "DIFF" => self.diff(&args, out),
            "MERGE" => self.merge(&args, out),
            "CONFIG" => {
                writeln!(out, "{:?}", self.config)?;
                Ok(())
            }
            "HELP" => {
                print_help(out)?;
                Ok(())
            }
            "EXIT" | "QUIT" => {
                writeln!(out, "bye")?;
                return Ok(Flow::Exit);
            }
            other => {
                writeln!(out, "unknown command: {}", other)?;
                return Ok(Flow::Continue);
            }
        };

        if let Err(e) = result {
            tracing::debug!(command = cmd, error = ?e, "command failed");
            writeln!(out, "ERR {} failed: {:#}", cmd.to_lowercase(), e)?;
        }
        Ok(Flow::Continue)
    }

    /// `INSPECT addr@path [n]`: header plus the first `n` records.
    fn inspect<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        let (target, count) = match args {
            [target] => (*target, DEFAULT_INSPECT_COUNT),
            [target, n] => (*target, n.parse::<usize>().with_context(|| format!("bad count {:?}", n))?),
            _ => bail!("usage: INSPECT addr@path [n]"),
        };
        let mut stream = self.open(target)?;

        writeln!(out, "{} {} ({} records)", stream.address(), stream.path().display(), stream.len())?;
        for record in stream.iter()?.take(count) {
            let r = record?;
            writeln!(
                out,
                "{:?} ts={} size={} flags={:#x}",
                r.key, r.timestamp, r.size, r.user_flags
            )?;
        }
        if stream.len() > count as u64 {
            writeln!(out, "... {} more", stream.len() - count as u64)?;
        }
        Ok(())
    }

    /// `SORT addr@path`: sorts the file in place.
    fn sort<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        let [target] = args else {
            bail!("usage: SORT addr@path");
        };
        let mut stream = self.open(target)?;
        stream.sort()?;
        writeln!(out, "OK ({} records)", stream.len())?;
        Ok(())
    }

    /// `DIFF source@path candidate@path`: writes what the candidate lacks next
    /// to the source file and keeps it.
    fn diff<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        let [source, candidate] = args else {
            bail!("usage: DIFF addr@path addr@path");
        };
        let mut source = self.open(source)?;
        let mut candidate = self.open(candidate)?;
        source.sort()?;
        candidate.sort()?;

        let mut diff = source.diff(&mut candidate)?;
        diff.set_leave_file(true);
        writeln!(out, "OK {} ({} records)", diff.path().display(), diff.len())?;
        Ok(())
    }

    /// `MERGE addr@path ...`: merges per-node diffs into the working directory.
    fn merge<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        if args.is_empty() {
            bail!("usage: MERGE addr@path [addr@path ...]");
        }
        let mut diffs = args
            .iter()
            .map(|target| -> Result<RecordStream> {
                let mut stream = self.open(target)?;
                stream.sort()?;
                Ok(stream)
            })
            .collect::<Result<Vec<_>>>()?;

        let merged = recovery::merge(&mut diffs, &self.config.tmp_dir)?;
        if merged.is_empty() {
            writeln!(out, "(empty)")?;
        }
        for stream in &merged {
            writeln!(
                out,
                "{} -> {} ({} records)",
                stream.address(),
                stream.path().display(),
                stream.len()
            )?;
        }
        Ok(())
    }

    /// Attaches to an existing `addr@path` file without taking ownership of it.
    /// Sorts run in chunks of `sort_chunk_records`.
    pub(crate) fn open(&self, target: &str) -> Result<RecordStream> {
        let (addr, path) = target
            .split_once('@')
            .ok_or_else(|| anyhow!("expected addr@path, got {:?}", target))?;
        let address: Address = addr.parse()?;
        let path = self.resolve(path);
        let mut stream = RecordStream::load(&path, address, false)?
            .ok_or_else(|| anyhow!("no such file: {}", path.display()))?;
        stream.set_sort_chunk_records(self.config.sort_chunk_records);
        Ok(stream)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.config.tmp_dir.join(path)
        }
    }
}

pub fn print_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Commands: INSPECT addr@path [n] | SORT addr@path")?;
    writeln!(out, "          DIFF addr@path addr@path | MERGE addr@path ...")?;
    writeln!(out, "          CONFIG | HELP | EXIT")
}
