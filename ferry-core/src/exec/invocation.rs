//! Command invocations and the buffers that capture their output

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::process::Command;

/// Shared byte buffer that collects a process stream while it runs
///
/// Cloning is cheap and every clone sees the same bytes, so a caller can keep
/// one end and hand the other to the executor.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the buffer
    pub fn append(&self, bytes: &[u8]) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(bytes);
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Everything written so far, decoded lossily as UTF-8
    pub fn to_string_lossy(&self) -> String {
        let buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// One external command to run: program, arguments, directory and streams
#[derive(Debug, Clone)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    stdin: Option<Vec<u8>>,
    stdout: Option<OutputBuffer>,
    stderr: Option<OutputBuffer>,
}

impl Invocation {
    /// Start building an invocation of `program`
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Run the process from `dir`
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set an environment variable for the process
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Feed `input` to the process's stdin, then close it
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Stream stdout into a caller-owned buffer
    pub fn stdout(mut self, buffer: OutputBuffer) -> Self {
        self.stdout = Some(buffer);
        self
    }

    /// Stream stderr into a caller-owned buffer
    pub fn stderr(mut self, buffer: OutputBuffer) -> Self {
        self.stderr = Some(buffer);
        self
    }

    /// The program to run
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// The arguments passed to the program
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// The working directory, if one was set
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Human-readable command line used in logs and errors
    pub fn describe(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Split into the tokio command plus the stream plumbing it needs
    pub(crate) fn into_parts(self) -> (Command, Option<Vec<u8>>, OutputBuffer, OutputBuffer) {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        (
            cmd,
            self.stdin,
            self.stdout.unwrap_or_default(),
            self.stderr.unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_joins_program_and_args() {
        let inv = Invocation::new("git").arg("clone").args(["a", "b"]);
        assert_eq!(inv.describe(), "git clone a b");
    }

    #[test]
    fn test_builder_records_dir() {
        let inv = Invocation::new("git").current_dir("/tmp/x");
        assert_eq!(inv.get_current_dir(), Some(Path::new("/tmp/x")));
        assert_eq!(inv.get_args().len(), 0);
    }

    #[test]
    fn test_output_buffer_shared_between_clones() {
        let buf = OutputBuffer::new();
        let other = buf.clone();
        other.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.to_string_lossy(), "hello world");
        assert_eq!(other.len(), 11);
        assert!(!other.is_empty());
    }
}
