//! Structured construction of external tool invocations.
//!
//! Arguments are kept as a list and handed to the OS one by one; nothing is
//! ever joined into a shell string, so paths with spaces or quotes are safe.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// A program plus its argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Short program name for error messages
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn raw_args(&self) -> &[OsString] {
        &self.args
    }

    /// Arguments as strings, lossily converted, for reporting
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Value following the first occurrence of `flag`
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(|a| a.as_os_str())
    }

    /// Last argument, which is the output target for ffmpeg invocations
    pub fn output_path(&self) -> Option<&Path> {
        self.args.last().map(Path::new)
    }

    /// Async command for this invocation; the child is killed if its handle is dropped
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Format seconds the way every invocation in this crate passes them
pub fn seconds_arg(seconds: f64) -> String {
    format!("{:.3}", seconds)
}

/// Builder for ffmpeg invocations with the crate's standard preamble
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    invocation: Invocation,
}

impl FfmpegCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        let invocation = Invocation::new(program).args(["-hide_banner", "-nostdin", "-v", "error", "-y"]);
        Self { invocation }
    }

    /// Input-side seek; applies to the next `input`
    pub fn seek(self, seconds: f64) -> Self {
        self.opt("-ss", seconds_arg(seconds))
    }

    pub fn input<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.invocation = self.invocation.arg("-i").arg(path.as_ref());
        self
    }

    /// Concat-demuxer list input
    pub fn concat_list<P: AsRef<Path>>(self, list: P) -> Self {
        self.opt("-f", "concat").opt("-safe", "0").input(list)
    }

    /// Output duration limit
    pub fn duration(self, seconds: f64) -> Self {
        self.opt("-t", seconds_arg(seconds))
    }

    /// Stream-copy every selected stream
    pub fn copy_streams(self) -> Self {
        self.opt("-c", "copy")
    }

    pub fn map<S: AsRef<OsStr>>(self, spec: S) -> Self {
        self.opt("-map", spec)
    }

    pub fn flag(mut self, flag: &str) -> Self {
        self.invocation = self.invocation.arg(flag);
        self
    }

    pub fn opt<S: AsRef<OsStr>>(mut self, key: &str, value: S) -> Self {
        self.invocation = self.invocation.arg(key).arg(value);
        self
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Invocation {
        self.invocation.arg(path.as_ref())
    }

    /// Write to stdout instead of a file
    pub fn output_pipe(self) -> Invocation {
        self.invocation.arg("-")
    }
}
