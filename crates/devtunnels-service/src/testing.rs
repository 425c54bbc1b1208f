//! Scripted [`CommandRunner`] for exercising the service layer without a
//! real `devtunnel`, `npm` or `winget` on the machine.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use devtunnels_core::{Error, ErrorCode, Result};

use crate::runner::{CommandResult, CommandRunner};

/// A recorded call to [`ScriptedRunner::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// File stem of the program, e.g. `devtunnel` for `/opt/bin/devtunnel`.
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Failure modes a scripted call can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Program missing (`CLI_NOT_FOUND`).
    NotFound,
    /// Process outlived its timeout (`PROCESS_TIMEOUT`).
    Timeout,
    /// Spawn or wait failed (`CLI_COMMAND_FAILED`).
    Spawn,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandResult),
    Fail(ScriptedFailure),
}

#[derive(Debug)]
struct Rule {
    program: String,
    args: Vec<String>,
    reply: Reply,
    /// `None` answers forever.
    remaining: Option<usize>,
}

impl Rule {
    fn matches(&self, program: &str, args: &[&str]) -> bool {
        self.remaining != Some(0)
            && self.program == program
            && self.args.len() <= args.len()
            && self.args.iter().zip(args).all(|(a, b)| a == b)
    }
}

/// Answers invocations from canned results.
///
/// A rule matches when the program's file stem equals the rule's program and
/// the rule's arguments are a prefix of the actual arguments. Rules are tried
/// in registration order; one-shot rules drop out after their first use.
/// Calls with no matching rule fail as `CLI_NOT_FOUND`.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `program args…` with `result`.
    pub fn respond(&self, program: &str, args: &[&str], result: CommandResult) -> &Self {
        self.push(program, args, Reply::Output(result), None)
    }

    /// Answer the next matching call only.
    pub fn respond_once(&self, program: &str, args: &[&str], result: CommandResult) -> &Self {
        self.push(program, args, Reply::Output(result), Some(1))
    }

    /// Always fail `program args…`.
    pub fn fail(&self, program: &str, args: &[&str], failure: ScriptedFailure) -> &Self {
        self.push(program, args, Reply::Fail(failure), None)
    }

    /// Fail the next matching call only.
    pub fn fail_once(&self, program: &str, args: &[&str], failure: ScriptedFailure) -> &Self {
        self.push(program, args, Reply::Fail(failure), Some(1))
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Number of invocations of `program` whose arguments start with `args`.
    pub fn call_count(&self, program: &str, args: &[&str]) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| {
                c.program == program
                    && c.args.len() >= args.len()
                    && c.args.iter().zip(args).all(|(a, b)| a == b)
            })
            .count()
    }

    fn push(
        &self,
        program: &str,
        args: &[&str],
        reply: Reply,
        remaining: Option<usize>,
    ) -> &Self {
        lock(&self.rules).push(Rule {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            reply,
            remaining,
        });
        self
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(
        &self,
        program: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandResult> {
        let name = program
            .file_stem()
            .map_or_else(|| program.display().to_string(), |s| s.to_string_lossy().into_owned());

        let invocation = Invocation {
            program: name.clone(),
            args: args.iter().map(ToString::to_string).collect(),
            timeout,
        };
        let cmd_line = invocation.command_line();
        lock(&self.calls).push(invocation);

        let reply = {
            let mut rules = lock(&self.rules);
            rules.iter_mut().find(|r| r.matches(&name, args)).map(|rule| {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.reply.clone()
            })
        };

        match reply {
            Some(Reply::Output(result)) => Ok(result),
            Some(Reply::Fail(ScriptedFailure::Timeout)) => Err(Error::process(
                ErrorCode::ProcessTimeout,
                format!("Command timed out after {}ms: {cmd_line}", timeout.as_millis()),
            )),
            Some(Reply::Fail(ScriptedFailure::Spawn)) => Err(Error::cli(
                ErrorCode::CliCommandFailed,
                format!("Command execution failed: {cmd_line}"),
            )),
            Some(Reply::Fail(ScriptedFailure::NotFound)) | None => Err(Error::cli(
                ErrorCode::CliNotFound,
                format!("Command execution failed: {cmd_line}"),
            )),
        }
    }
}

/// Exit 0 with `stdout`.
pub fn ok(stdout: &str) -> CommandResult {
    CommandResult {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

/// Non-zero exit with `stderr`.
pub fn exit(exit_code: i32, stderr: &str) -> CommandResult {
    CommandResult {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
