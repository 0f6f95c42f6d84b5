//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::rc::Rc;

use serde_json::{Map, Value, json};

use crate::rbd::RbdError;
use crate::runner::{CommandOutput, CommandRunner};

/// Records a single invocation made through a test runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the `rbd` subcommand, skipping any leading credential flags.
    #[must_use]
    pub fn verb(&self) -> Option<String> {
        let mut args = self.args.iter().map(|arg| arg.to_string_lossy());
        while let Some(arg) = args.next() {
            if AUTH_FLAGS.contains(&&*arg) {
                args.next();
                continue;
            }
            return Some(arg.into_owned());
        }
        None
    }
}

const AUTH_FLAGS: [&str; 3] = ["--id", "--keyring", "--keyfile"];

fn count_verb(invocations: &[CommandInvocation], verb: &str) -> usize {
    invocations
        .iter()
        .filter(|call| call.verb().as_deref() == Some(verb))
        .count()
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Counts recorded invocations of the given `rbd` subcommand.
    #[must_use]
    pub fn count(&self, verb: &str) -> usize {
        count_verb(&self.invocations.borrow(), verb)
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RbdError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RbdError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Pool assumed by `rbd` when an image spec carries none.
pub const SIMULATED_DEFAULT_POOL: &str = "rbd";

#[derive(Debug, Default)]
struct SimulatedState {
    images: BTreeSet<(String, String)>,
    mappings: BTreeMap<u32, (String, String)>,
    failures: BTreeMap<String, i32>,
    invocations: Vec<CommandInvocation>,
}

/// Stateful stand-in for the `rbd` CLI.
///
/// Tracks images and kernel mappings so that repeated calls observe the
/// effects of earlier ones, which scripted responses cannot express.
/// Devices are allocated as `/dev/rbd<N>` using the lowest free index.
#[derive(Clone, Debug, Default)]
pub struct SimulatedRbd {
    state: Rc<RefCell<SimulatedState>>,
}

impl SimulatedRbd {
    /// Creates a backend with no images and no mappings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing image.
    #[must_use]
    pub fn with_image(self, pool: &str, name: &str) -> Self {
        self.state
            .borrow_mut()
            .images
            .insert((pool.to_owned(), name.to_owned()));
        self
    }

    /// Makes every invocation of `verb` exit with `code`.
    #[must_use]
    pub fn failing(self, verb: &str, code: i32) -> Self {
        self.state
            .borrow_mut()
            .failures
            .insert(verb.to_owned(), code);
        self
    }

    /// Returns `true` when the image exists.
    #[must_use]
    pub fn has_image(&self, pool: &str, name: &str) -> bool {
        self.state
            .borrow()
            .images
            .contains(&(pool.to_owned(), name.to_owned()))
    }

    /// Number of live mappings.
    #[must_use]
    pub fn mapped_count(&self) -> usize {
        self.state.borrow().mappings.len()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.state.borrow().invocations.clone()
    }

    /// Counts recorded invocations of the given `rbd` subcommand.
    #[must_use]
    pub fn count(&self, verb: &str) -> usize {
        count_verb(&self.state.borrow().invocations, verb)
    }

    fn respond(&self, verb: &str, operands: &[String]) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.failures.get(verb).copied() {
            return failure(code, &format!("rbd: simulated {verb} failure"));
        }

        let image = operands.first().map(|spec| split_spec(spec));
        match (verb, image) {
            ("showmapped", _) => success(render_mappings(&state.mappings)),
            ("create", Some(key)) => {
                if state.images.insert(key) {
                    success(String::new())
                } else {
                    failure(17, "rbd: create error: (17) File exists")
                }
            }
            ("map", Some(key)) => {
                if !state.images.contains(&key) {
                    return failure(2, "rbd: error opening image: (2) No such file or directory");
                }
                let index = (0..)
                    .find(|candidate| !state.mappings.contains_key(candidate))
                    .unwrap_or_default();
                state.mappings.insert(index, key);
                success(format!("/dev/rbd{index}\n"))
            }
            ("unmap", _) => {
                let index = operands
                    .first()
                    .and_then(|device| device.strip_prefix("/dev/rbd"))
                    .and_then(|suffix| suffix.parse::<u32>().ok());
                match index.and_then(|idx| state.mappings.remove(&idx)) {
                    Some(_) => success(String::new()),
                    None => failure(22, "rbd: unmap failed: (22) Invalid argument"),
                }
            }
            ("resize", Some(key)) if state.images.contains(&key) => success(String::new()),
            ("rm", Some(key)) => {
                if state.mappings.values().any(|mapped| *mapped == key) {
                    failure(16, "rbd: error: image still has watchers")
                } else if state.images.remove(&key) {
                    success(String::new())
                } else {
                    failure(2, "rbd: error opening image: (2) No such file or directory")
                }
            }
            _ => failure(2, "rbd: error opening image: (2) No such file or directory"),
        }
    }
}

impl CommandRunner for SimulatedRbd {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RbdError> {
        let invocation = CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        };
        let verb = invocation.verb().unwrap_or_default();
        let operands = invocation
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .skip_while(|arg| *arg != verb)
            .skip(1)
            .collect::<Vec<_>>();
        self.state.borrow_mut().invocations.push(invocation);
        Ok(self.respond(&verb, &operands))
    }
}

fn split_spec(spec: &str) -> (String, String) {
    spec.split_once('/').map_or_else(
        || (SIMULATED_DEFAULT_POOL.to_owned(), spec.to_owned()),
        |(pool, name)| (pool.to_owned(), name.to_owned()),
    )
}

fn render_mappings(mappings: &BTreeMap<u32, (String, String)>) -> String {
    showmapped_payload(mappings.iter().map(|(index, (pool, name))| {
        (
            index.to_string(),
            pool.as_str(),
            name.as_str(),
            format!("/dev/rbd{index}"),
        )
    }))
}

/// Renders the keyed form of `rbd showmapped --format json` from
/// `(id, pool, name, device)` entries.
fn showmapped_payload<'a>(entries: impl Iterator<Item = (String, &'a str, &'a str, String)>) -> String {
    let listing = entries
        .map(|(id, pool, name, device)| {
            (
                id,
                json!({ "pool": pool, "name": name, "snap": "-", "device": device }),
            )
        })
        .collect::<Map<String, Value>>();
    Value::Object(listing).to_string()
}

fn success(stdout: String) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout,
        stderr: String::new(),
    }
}

fn failure(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

/// Produces a payload matching `rbd showmapped --format json` in the keyed
/// form, numbering entries from zero.
#[must_use]
pub fn json_showmapped(mappings: &[(&str, &str, &str)]) -> String {
    showmapped_payload(
        mappings
            .iter()
            .enumerate()
            .map(|(index, (pool, name, device))| (index.to_string(), *pool, *name, (*device).to_owned())),
    )
}
