//! Narrow bridge to external tools (`cryptsetup`, `dmsetup`). Never aborts
//! the process; spawn failures are reported through the result struct so the
//! caller keeps policy.

use std::process::{Command, Stdio};

use crate::error::SubprocessError;

/// Upper bound on argument count passed to a single subprocess invocation.
pub const MAX_ARGV_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubprocessResult {
    pub executed: bool,
    pub exit_code: i32,
}

impl SubprocessResult {
    pub fn succeeded(self) -> bool {
        self.executed && self.exit_code == 0
    }
}

/// Abstracts over "run this program with these arguments and tell me how it
/// went", so LUKS/device-mapper wrapper logic can be unit tested without a
/// real `cryptsetup`/`dmsetup` binary.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<SubprocessResult, SubprocessError>;
}

/// Production runner: spawns a real child process and waits for it.
pub struct RealCommandRunner {
    /// When false, the child's stdout/stderr are inherited; suppressing them
    /// keeps normal-verbosity runs from being drowned out by tool chatter.
    pub verbose: bool,
}

impl RealCommandRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl CommandRunner for RealCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<SubprocessResult, SubprocessError> {
        if args.len() > MAX_ARGV_LEN {
            return Err(SubprocessError::TooManyArguments {
                count: args.len(),
                max: MAX_ARGV_LEN,
            });
        }

        let mut cmd = Command::new(program);
        cmd.args(args);
        if !self.verbose {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }

        tracing::debug!(program, ?args, "spawning subprocess");

        match cmd.status() {
            Ok(status) => {
                let exit_code = status.code().unwrap_or(-1);
                tracing::debug!(program, exit_code, "subprocess finished");
                Ok(SubprocessResult {
                    executed: true,
                    exit_code,
                })
            }
            Err(e) => {
                tracing::warn!(program, error = %e, "failed to spawn subprocess");
                Ok(SubprocessResult {
                    executed: false,
                    exit_code: 0,
                })
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeCommandRunner;
    use super::*;

    #[test]
    fn real_runner_rejects_too_many_arguments() {
        let runner = RealCommandRunner::new(false);
        let args: Vec<String> = (0..MAX_ARGV_LEN + 1).map(|i| i.to_string()).collect();
        let err = runner.run("true", &args).unwrap_err();
        assert!(matches!(err, SubprocessError::TooManyArguments { .. }));
    }

    #[test]
    fn fake_runner_replays_queued_responses_in_order() {
        let runner = FakeCommandRunner::new(SubprocessResult {
            executed: true,
            exit_code: 1,
        });
        runner.push_response(
            "cryptsetup",
            SubprocessResult {
                executed: true,
                exit_code: 0,
            },
        );
        let first = runner.run("cryptsetup", &["isLuks".into()]).unwrap();
        assert_eq!(first.exit_code, 0);
        let second = runner.run("cryptsetup", &["isLuks".into()]).unwrap();
        assert_eq!(second.exit_code, 1);
        assert_eq!(runner.calls.borrow().len(), 2);
    }
}
