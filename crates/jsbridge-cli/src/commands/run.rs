//! Run command - execute a script file through an engine session.

use anyhow::{Context, Result};
use clap::Args;
use jsbridge_core::{EngineSession, HandleStats, ValueType};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use super::print_stats;
use crate::config::Config;
use crate::host::{Watchdog, display, install_print};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Args)]
pub struct RunCommand {
    /// Script file to execute
    pub file: PathBuf,

    /// Name reported in error locations (defaults to the file path)
    #[arg(long)]
    pub source_name: Option<String>,

    /// Timeout in milliseconds (0 = no timeout)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print handle statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// What a script run produced
#[derive(Debug)]
pub struct ScriptOutcome {
    pub value_type: ValueType,
    pub text: String,
    pub stats: HandleStats,
    pub timed_out: bool,
}

impl ScriptOutcome {
    pub fn failed(&self) -> bool {
        self.value_type.is_error()
    }
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let outcome = self.execute(config, std::io::stdout())?;

        if outcome.timed_out {
            eprintln!("Script exceeded its timeout and was terminated");
        }
        if outcome.failed() {
            eprintln!("{}", outcome.text);
        } else {
            println!("{}", outcome.text);
        }
        if self.json {
            println!("{}", serde_json::to_string_pretty(&outcome.stats)?);
        } else {
            println!();
            print_stats(&outcome.stats);
        }

        if outcome.failed() {
            std::process::exit(1);
        }
        Ok(())
    }

    /// Run the file in a fresh session, sending `print` output to `out`
    pub fn execute<W: Write + Send + 'static>(&self, config: &Config, out: W) -> Result<ScriptOutcome> {
        let source = std::fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let source_name = self
            .source_name
            .clone()
            .unwrap_or_else(|| self.file.display().to_string());
        let timeout = self
            .timeout_ms
            .or(config.run.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let session = EngineSession::new(config.session.clone());
        install_print(&session, out)?;
        tracing::debug!(session = session.id(), file = %self.file.display(), timeout, "running script");

        let watchdog = if timeout > 0 {
            Some(Watchdog::spawn(session.clone(), Duration::from_millis(timeout))?)
        } else {
            None
        };
        let result = session.execute(&source, &source_name);
        let timed_out = watchdog.is_some_and(Watchdog::finish);
        let result = result?;

        let value_type = session.value_type(result)?;
        let text = display(&session, result)?.replace("\r\n", "\n").trim_end().to_string();
        session.try_dispose(result);
        let stats = session.stats();
        session.shutdown();

        Ok(ScriptOutcome {
            value_type,
            text,
            stats,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn command(dir: &tempfile::TempDir, source: &str) -> RunCommand {
        let file = dir.path().join("script.js");
        std::fs::write(&file, source).unwrap();
        RunCommand {
            file,
            source_name: Some("script.js".to_string()),
            timeout_ms: None,
            json: false,
        }
    }

    #[test]
    fn test_run_prints_and_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let capture = Capture::default();
        let outcome = command(&dir, "print('hi'); 20 + 22")
            .execute(&Config::default(), capture.clone())
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&capture.0.lock()), "hi\n");
        assert!(!outcome.failed());
        assert_eq!(outcome.value_type, ValueType::Int32);
        assert_eq!(outcome.text, "42");
        assert!(!outcome.timed_out);
    }

    #[test]
    fn test_script_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = command(&dir, "throw new Error('broken')")
            .execute(&Config::default(), io::sink())
            .unwrap();

        assert!(outcome.failed());
        assert_eq!(outcome.value_type, ValueType::ExecutionError);
        assert!(outcome.text.contains("broken"));
        assert!(!outcome.text.contains('\r'));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = command(&dir, "var = ;")
            .execute(&Config::default(), io::sink())
            .unwrap();
        assert_eq!(outcome.value_type, ValueType::CompilerError);
        assert!(outcome.text.contains("Line: 1"));
    }

    #[test]
    fn test_timeout_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = command(&dir, "while (true) {}");
        run.timeout_ms = Some(50);
        let outcome = run.execute(&Config::default(), io::sink()).unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.value_type, ValueType::ExecutionTerminated);
    }

    #[test]
    fn test_config_timeout_applies() {
        let dir = tempfile::tempdir().unwrap();
        let config: Config = toml::from_str("[run]\ntimeout_ms = 50\n").unwrap();
        let outcome = command(&dir, "for (;;) {}")
            .execute(&config, io::sink())
            .unwrap();
        assert!(outcome.timed_out);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunCommand {
            file: dir.path().join("absent.js"),
            source_name: None,
            timeout_ms: None,
            json: false,
        };
        assert!(run.execute(&Config::default(), io::sink()).is_err());
    }

    #[test]
    fn test_result_disposed_before_stats() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = command(&dir, "({ a: 1 })")
            .execute(&Config::default(), io::sink())
            .unwrap();
        assert_eq!(outcome.value_type, ValueType::Object);
        assert_eq!(outcome.stats.in_use, 0);
        assert!(outcome.stats.recycled >= 1);
    }
}
