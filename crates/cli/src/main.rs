///! # recoveryctl - recovery diagnostics shell
///!
///! A REPL for inspecting and replaying the files an anti-entropy recovery
///! run leaves behind: iterator snapshots, diffs and merge outputs. Reads
///! commands from stdin and prints results to stdout, so it can be driven
///! interactively or from a script. Logs go to stderr.
///!
///! ## Commands
///!
///! ```text
///! INSPECT addr@path [n]        Print the header and first n records (default 10)
///! SORT addr@path               Sort a stream file in place
///! DIFF addr@path addr@path     Records the second node lacks or holds older
///! MERGE addr@path ...          Merge per-node diffs into recovery queues
///! CONFIG                       Print the active configuration
///! HELP                         List commands
///! EXIT / QUIT                  Leave the shell
///! ```
///!
///! `addr` is `host:port:group`. Relative paths are resolved against
///! `RECOVERY_TMP_DIR`.
///!
///! ## Configuration
///!
///! ```text
///! RECOVERY_TMP_DIR     working directory         (default: "/var/tmp")
///! RECOVERY_SORT_CHUNK  records per sort run      (default: 1048576)
///! RUST_LOG             log filter                (default: "warn")
///! ```
///!
///! ## Example
///!
///! ```text
///! $ RECOVERY_TMP_DIR=/var/tmp/recovery cargo run -p cli --bin recoveryctl
///! recoveryctl started (tmp_dir=/var/tmp/recovery)
///! > SORT 10.0.0.1:1025:2@iterator_10.0.0.1-1025-2
///! OK (48213 records)
///! > EXIT
///! bye
///! ```

mod shell;

use anyhow::Result;
use config::RecoveryConfig;
use shell::{Flow, Shell};
use std::io::{self, BufRead, IsTerminal, Write};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let config = RecoveryConfig::from_env();
    let mut shell = Shell::new(config);

    println!(
        "recoveryctl started (tmp_dir={})",
        shell.config().tmp_dir.display()
    );
    let mut stdout = io::stdout();
    shell::print_help(&mut stdout)?;
    print!("> ");
    stdout.flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if shell.execute(&line, &mut stdout)? == Flow::Exit {
            break;
        }
        print!("> ");
        stdout.flush().ok();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::shell::{Flow, Shell};
    use config::RecoveryConfig;
    use stream::{Address, Key, Record, RecordStream, Timestamp};
    use tempfile::tempdir;

    fn shell_in(dir: &std::path::Path) -> Shell {
        Shell::new(RecoveryConfig {
            tmp_dir: dir.to_path_buf(),
            ..RecoveryConfig::default()
        })
    }

    fn run(shell: &mut Shell, line: &str) -> String {
        let mut out = Vec::new();
        shell.execute(line, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn write_stream(dir: &std::path::Path, name: &str, port: u16, keys: &[(u64, u64)]) {
        let mut s = RecordStream::create(dir.join(name), Address::new("127.0.0.1", port, 1)).unwrap();
        for &(k, ts) in keys {
            s.append(&Record::new(Key::from(k), Timestamp::new(ts, 0), 0, 0))
                .unwrap();
        }
        s.set_leave_file(true);
    }

    #[test]
    fn inspect_prints_header_and_records() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), "snap", 1025, &[(3, 1), (1, 2), (2, 3)]);
        let mut shell = shell_in(dir.path());

        let out = run(&mut shell, "INSPECT 127.0.0.1:1025:1@snap 2");
        assert!(out.contains("127.0.0.1:1025:1"));
        assert!(out.contains("(3 records)"));
        assert_eq!(out.matches("ts=").count(), 2);
        assert!(out.contains("... 1 more"));
    }

    #[test]
    fn sort_then_diff() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), "a", 1, &[(3, 10), (1, 10), (2, 10)]);
        write_stream(dir.path(), "b", 2, &[(2, 5), (1, 10)]);
        let mut shell = shell_in(dir.path());

        assert!(run(&mut shell, "SORT 127.0.0.1:1:1@a").contains("OK (3 records)"));
        let out = run(&mut shell, "diff 127.0.0.1:1:1@a 127.0.0.1:2:1@b");
        assert!(out.starts_with("OK "), "{}", out);
        assert!(out.contains("(2 records)"));
    }

    #[test]
    fn merge_reports_one_queue_per_node() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), "x", 1, &[(5, 100), (9, 50)]);
        write_stream(dir.path(), "y", 2, &[(5, 90), (12, 10)]);
        let mut shell = shell_in(dir.path());

        let out = run(&mut shell, "MERGE 127.0.0.1:1:1@x 127.0.0.1:2:1@y");
        assert!(out.contains("127.0.0.1:1:1 -> "));
        assert!(out.contains("merge_127.0.0.1-1-1 (2 records)"));
        assert!(out.contains("merge_127.0.0.1-2-1 (1 records)"));
    }

    #[test]
    fn opened_streams_use_configured_sort_chunk() {
        let dir = tempdir().unwrap();
        write_stream(dir.path(), "snap", 1, &[(3, 1), (1, 1), (2, 1)]);
        let shell = Shell::new(RecoveryConfig {
            tmp_dir: dir.path().to_path_buf(),
            sort_chunk_records: 2,
            ..RecoveryConfig::default()
        });

        let stream = shell.open("127.0.0.1:1:1@snap").unwrap();
        assert_eq!(stream.sort_chunk_records(), 2);
    }

    #[test]
    fn errors_are_reported_inline() {
        let dir = tempdir().unwrap();
        let mut shell = shell_in(dir.path());

        assert!(run(&mut shell, "INSPECT 127.0.0.1:1:1@missing").starts_with("ERR inspect failed"));
        assert!(run(&mut shell, "INSPECT nonsense").starts_with("ERR inspect failed"));
        assert!(run(&mut shell, "SORT").contains("usage"));
        assert!(run(&mut shell, "FROB").contains("unknown command"));
        assert_eq!(run(&mut shell, "   "), "");
    }

    #[test]
    fn exit_stops_the_loop() {
        let dir = tempdir().unwrap();
        let mut shell = shell_in(dir.path());
        let mut out = Vec::new();
        assert_eq!(shell.execute("quit", &mut out).unwrap(), Flow::Exit);
        assert_eq!(String::from_utf8(out).unwrap(), "bye\n");
    }
}
