//! Running build steps.

use anyhow::Result;

use crate::builder::plan::BuildStep;
use crate::util::process::{ExecLimits, ProcessOutput};

/// Executes planned build steps.
///
/// A nonzero exit is reported through [`ProcessOutput`], not as an error.
/// `Err` means the step could not be started at all.
pub trait StepRunner: Send + Sync {
    fn run(&self, step: &BuildStep, limits: &ExecLimits) -> Result<ProcessOutput>;
}

/// Runs steps as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl StepRunner for SystemRunner {
    fn run(&self, step: &BuildStep, limits: &ExecLimits) -> Result<ProcessOutput> {
        step.command.exec_limited(limits)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::builder::plan::Stage;
    use crate::util::process::ProcessBuilder;
    use std::time::Duration;

    fn step(program: &str, args: &[&str]) -> BuildStep {
        BuildStep {
            stage: Stage::Build,
            label: program.to_string(),
            command: ProcessBuilder::new(program).args(args),
        }
    }

    #[test]
    fn test_system_runner_reports_exit_code() {
        let out = SystemRunner
            .run(&step("sh", &["-c", "echo oops; exit 3"]), &ExecLimits::default())
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(out.output.contains("oops"));
        assert!(!out.success());
    }

    #[test]
    fn test_system_runner_times_out() {
        let limits = ExecLimits {
            timeout: Some(Duration::from_millis(100)),
            ..ExecLimits::default()
        };
        let out = SystemRunner.run(&step("sleep", &["5"]), &limits).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let err = SystemRunner
            .run(&step("/nonexistent/extbrew-tool", &[]), &ExecLimits::default())
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
