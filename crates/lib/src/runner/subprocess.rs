//! Run migrations through an external program speaking JSON on stdin/stdout.
//!
//! The program receives `{"recipe_source", "node_attrs", "params"}` and answers with
//! either a [`RunOutput`] object or `{"no_change": true}`.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{MigrationRunner, RunOutcome, RunOutput, RunnerError};
use crate::graph::NodeAttrs;

#[derive(Debug, Clone)]
pub struct SubprocessRunner {
  program: PathBuf,
  args: Vec<String>,
  env: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Request<'a> {
  recipe_source: &'a str,
  node_attrs: &'a NodeAttrs,
  params: &'a Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Response {
  NoChange { no_change: bool },
  Changed(RunOutput),
}

impl SubprocessRunner {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }
}

impl MigrationRunner for SubprocessRunner {
  fn run(&self, recipe_source: &str, node: &NodeAttrs, params: &Value) -> Result<RunOutcome, RunnerError> {
    info!(program = %self.program.display(), node = %node.name, "running migration");

    let request = serde_json::to_vec(&Request {
      recipe_source,
      node_attrs: node,
      params,
    })
    .map_err(RunnerError::Encode)?;

    let mut child = Command::new(&self.program)
      .args(&self.args)
      .envs(&self.env)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(RunnerError::Spawn)?;

    // Fed from a separate thread so a runner that writes before draining stdin can't
    // block on a full stdout pipe while we block on a full stdin pipe.
    let writer = child
      .stdin
      .take()
      .map(|mut stdin| thread::spawn(move || stdin.write_all(&request)));

    let output = child.wait_with_output().map_err(RunnerError::Pipe)?;
    if let Some(writer) = writer {
      match writer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
          debug!(node = %node.name, "runner exited without reading its request");
        }
        Ok(Err(e)) => return Err(RunnerError::Pipe(e)),
        Err(_) => return Err(RunnerError::Pipe(io::Error::other("stdin writer panicked"))),
      }
    }
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      debug!(stderr = %stderr, "runner stderr");
      return Err(RunnerError::Failed {
        code: output.status.code(),
        stderr,
      });
    }

    match serde_json::from_slice(&output.stdout).map_err(RunnerError::InvalidOutput)? {
      Response::NoChange { no_change: true } => Ok(RunOutcome::NoChange),
      Response::NoChange { no_change: false } => Err(RunnerError::Migration(
        "runner answered no_change=false without a new recipe".to_string(),
      )),
      Response::Changed(out) if out.new_recipe_source == recipe_source => Ok(RunOutcome::NoChange),
      Response::Changed(out) => Ok(RunOutcome::Changed(out)),
    }
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use serde_json::json;

  fn sh(script: &str) -> SubprocessRunner {
    SubprocessRunner::new("/bin/sh").arg("-c").arg(script)
  }

  #[test]
  fn parses_changed_output() {
    let runner = sh(
      r#"cat >/dev/null; printf '{"new_recipe_source":"new","commit_message":"m","proposal_title":"t","proposal_body":"b"}'"#,
    );
    let out = runner.run("old", &NodeAttrs::new("numpy"), &json!({})).unwrap();
    assert_eq!(
      out,
      RunOutcome::Changed(RunOutput {
        new_recipe_source: "new".into(),
        commit_message: "m".into(),
        proposal_title: "t".into(),
        proposal_body: "b".into(),
      })
    );
  }

  #[test]
  fn unchanged_source_is_no_change() {
    let runner = sh(
      r#"cat >/dev/null; printf '{"new_recipe_source":"same","commit_message":"m","proposal_title":"t","proposal_body":"b"}'"#,
    );
    assert_eq!(
      runner.run("same", &NodeAttrs::new("numpy"), &json!({})).unwrap(),
      RunOutcome::NoChange
    );
  }

  #[test]
  fn explicit_no_change() {
    let runner = sh(r#"cat >/dev/null; printf '{"no_change":true}'"#);
    assert_eq!(
      runner.run("x", &NodeAttrs::new("numpy"), &json!({})).unwrap(),
      RunOutcome::NoChange
    );
  }

  #[test]
  fn receives_request_on_stdin() {
    let runner = sh(r#"grep -q '"name":"scipy"' && printf '{"no_change":true}'"#);
    assert!(runner.run("x", &NodeAttrs::new("scipy"), &json!({})).is_ok());
  }

  #[test]
  fn large_output_before_reading_request() {
    let runner = sh(
      r#"head -c 1048576 /dev/zero >&2; cat >/dev/null; printf '{"no_change":true}'"#,
    );
    let params = json!({ "padding": "x".repeat(1 << 20) });
    assert_eq!(
      runner.run("x", &NodeAttrs::new("numpy"), &params).unwrap(),
      RunOutcome::NoChange
    );
  }

  #[test]
  fn runner_ignoring_request_still_answers() {
    let runner = sh(r#"printf '{"no_change":true}'"#);
    let params = json!({ "padding": "x".repeat(1 << 20) });
    assert_eq!(
      runner.run("x", &NodeAttrs::new("numpy"), &params).unwrap(),
      RunOutcome::NoChange
    );
  }

  #[test]
  fn non_zero_exit_is_failure() {
    let runner = sh("cat >/dev/null; echo boom >&2; exit 3");
    let err = runner.run("x", &NodeAttrs::new("numpy"), &json!({})).unwrap_err();
    assert!(matches!(err, RunnerError::Failed { code: Some(3), ref stderr } if stderr == "boom"));
  }

  #[test]
  fn garbage_output_is_invalid() {
    let runner = sh("cat >/dev/null; echo not-json");
    assert!(matches!(
      runner.run("x", &NodeAttrs::new("numpy"), &json!({})),
      Err(RunnerError::InvalidOutput(_))
    ));
  }
}
