//! Dispatcher abstraction for worker invocation.
//!
//! The [`Dispatcher`] trait decouples the trampoline from how a worker decides
//! between recursing and answering. Closures implement it directly; tests use
//! scripted dispatchers and the CLI uses [`CommandDispatcher`] or
//! [`PlaceholderDispatcher`].

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::outcome::parse_outcome;
use crate::core::types::{DispatchOutcome, Frame, TerminalResult};
use crate::io::config::DispatcherSection;
use crate::io::process::run_command;

/// Produces the outcome of one frame: recurse deeper or answer.
pub trait Dispatcher {
    fn dispatch(&mut self, frame: &Frame) -> Result<DispatchOutcome>;
}

impl<F> Dispatcher for F
where
    F: FnMut(&Frame) -> Result<DispatchOutcome>,
{
    fn dispatch(&mut self, frame: &Frame) -> Result<DispatchOutcome> {
        self(frame)
    }
}

/// Worker stand-in that answers every frame immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderDispatcher;

impl Dispatcher for PlaceholderDispatcher {
    fn dispatch(&mut self, frame: &Frame) -> Result<DispatchOutcome> {
        Ok(DispatchOutcome::Result(TerminalResult {
            content: format!("Analysis of '{}' at depth {}", frame.description, frame.depth),
            metadata: frame
                .context
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            token_count: 1000,
            cost_usd: 0.003,
        }))
    }
}

/// Runs an external worker program once per frame.
///
/// The frame is written to the worker's stdin as JSON; the worker must print a
/// single `CONTINUATION` or `RESULT` reply on stdout.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandDispatcher {
    pub fn new(
        command: &[String],
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("worker command must not be empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        })
    }

    pub fn from_config(section: &DispatcherSection, workdir: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            &section.command,
            workdir,
            Duration::from_secs(section.timeout_secs),
            section.output_limit_bytes,
        )
    }
}

impl Dispatcher for CommandDispatcher {
    #[instrument(skip_all, fields(program = %self.program, agent_role = %frame.agent_role, depth = frame.depth))]
    fn dispatch(&mut self, frame: &Frame) -> Result<DispatchOutcome> {
        info!("starting worker");
        let input = serde_json::to_vec(frame).context("serialize frame")?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.workdir);
        let output = run_command(cmd, &input, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run worker {}", self.program))?;

        if !output.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr), "worker stderr");
        }
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "worker timed out");
            return Err(anyhow!("worker timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "worker failed");
            return Err(anyhow!(
                "worker exited with status {:?}",
                output.status.code()
            ));
        }
        if output.truncated_bytes > 0 {
            return Err(anyhow!(
                "worker output exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        let outcome = parse_outcome(&output.stdout).context("parse worker reply")?;
        debug!(
            continuation = matches!(outcome, DispatchOutcome::Continuation(_)),
            "worker replied"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::UnknownOutcomeType;
    use serde_json::json;

    #[test]
    fn placeholder_answers_with_frame_details() {
        let frame = Frame::root("notes.txt", "find todos");
        let DispatchOutcome::Result(result) =
            PlaceholderDispatcher.dispatch(&frame).expect("dispatch")
        else {
            panic!("expected result");
        };
        assert_eq!(result.content, "Analysis of 'find todos' at depth 0");
        assert_eq!(result.token_count, 1000);
        assert_eq!(result.metadata.get("document_path"), Some(&json!("notes.txt")));
    }

    #[test]
    fn closures_are_dispatchers() {
        let mut calls = 0;
        let mut dispatcher = |frame: &Frame| -> Result<DispatchOutcome> {
            calls += 1;
            PlaceholderDispatcher.dispatch(frame)
        };
        dispatcher.dispatch(&Frame::root("a", "b")).expect("dispatch");
        dispatcher.dispatch(&Frame::root("a", "b")).expect("dispatch");
        assert_eq!(calls, 2);
    }

    #[test]
    fn command_dispatcher_rejects_empty_command() {
        let err = CommandDispatcher::new(&[], ".", Duration::from_secs(1), 10).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[cfg(unix)]
    fn sh_dispatcher(script: &str) -> CommandDispatcher {
        let temp = std::env::temp_dir();
        CommandDispatcher::new(
            &["sh".to_string(), "-c".to_string(), script.to_string()],
            temp,
            Duration::from_secs(5),
            64 * 1024,
        )
        .expect("dispatcher")
    }

    #[cfg(unix)]
    #[test]
    fn command_dispatcher_parses_worker_reply() {
        let mut dispatcher = sh_dispatcher(
            r#"cat > /dev/null; printf '{"type":"CONTINUATION","agent_role":"Worker","description":"part 1","return_label":"p1"}'"#,
        );
        let outcome = dispatcher
            .dispatch(&Frame::root("doc", "q"))
            .expect("dispatch");
        let DispatchOutcome::Continuation(request) = outcome else {
            panic!("expected continuation");
        };
        assert_eq!(request.return_label, "p1");
    }

    #[cfg(unix)]
    #[test]
    fn command_dispatcher_receives_frame_on_stdin() {
        // Echo the frame's description back as the result content.
        let mut dispatcher = sh_dispatcher(
            r#"desc=$(cat | sed -n 's/.*"description":"\([^"]*\)".*/\1/p'); printf '{"type":"RESULT","content":"%s"}' "$desc""#,
        );
        let outcome = dispatcher
            .dispatch(&Frame::root("doc", "count words"))
            .expect("dispatch");
        assert_eq!(
            outcome,
            DispatchOutcome::Result(TerminalResult {
                content: "count words".to_string(),
                metadata: Default::default(),
                token_count: 0,
                cost_usd: 0.0,
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn command_dispatcher_reports_failure_status() {
        let mut dispatcher = sh_dispatcher("cat > /dev/null; exit 4");
        let err = dispatcher.dispatch(&Frame::root("doc", "q")).unwrap_err();
        assert!(err.to_string().contains("status Some(4)"));
    }

    #[cfg(unix)]
    #[test]
    fn command_dispatcher_surfaces_unknown_outcome_type() {
        let mut dispatcher = sh_dispatcher(r#"cat > /dev/null; printf '{"type":"PARTIAL"}'"#);
        let err = dispatcher.dispatch(&Frame::root("doc", "q")).unwrap_err();
        assert!(err.downcast_ref::<UnknownOutcomeType>().is_some());
    }
}
