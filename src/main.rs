//! Binary entry point for the `rbd-extstorage` ExtStorage provider.
//!
//! Ganeti installs one symlink per action pointing at this binary; the
//! symlink name selects the action. Invoked under its own name the action is
//! taken from the first argument instead.

use std::any::Any;
use std::backtrace::Backtrace;
use std::env;
use std::ffi::OsString;
use std::io::{self, Write};
use std::panic::{self, UnwindSafe};
use std::path::Path;
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::error;

use rbd_extstorage::logging::{self, DEFAULT_LOG_FILTER};
use rbd_extstorage::{
    Action, ActionError, AdapterConfig, ConfigError, Dispatcher, EXIT_FAILURE, EXIT_SUCCESS, Rbd,
    VolumeConfig,
};

mod cli;

use cli::Cli;

/// Program name under which the action comes from the command line.
const BIN_NAME: &str = "rbd-extstorage";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("failed to write attach output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Action(err) => err.exit_code(),
            Self::Config(_) | Self::Output(_) => EXIT_FAILURE,
        }
    }
}

fn main() {
    install_panic_hook();
    let args = env::args_os().collect::<Vec<_>>();
    process::exit(guarded(move || run(args)));
}

/// Logs every panic with a captured backtrace before unwinding starts, then
/// hands over to the previously installed hook.
fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        error!(backtrace = %Backtrace::force_capture(), "panic: {info}");
        previous(info);
    }));
}

/// Runs `action`, turning a panic into [`EXIT_FAILURE`].
fn guarded<F>(action: F) -> i32
where
    F: FnOnce() -> i32 + UnwindSafe,
{
    panic::catch_unwind(action).unwrap_or_else(|payload| {
        error!(
            cause = panic_message(payload.as_ref()),
            "action aborted by an unexpected failure"
        );
        EXIT_FAILURE
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn run(args: Vec<OsString>) -> i32 {
    let action_name = match resolve_action(args) {
        Ok(name) => name,
        Err(err) => return report_usage(&err),
    };

    let settings = AdapterConfig::load_without_cli_args();
    let (filter, json) = settings.as_ref().map_or((DEFAULT_LOG_FILTER, false), |cfg| {
        (cfg.log_filter.as_str(), cfg.log_json)
    });
    logging::init(filter, json).ok();

    let outcome = settings
        .and_then(|cfg| cfg.validate().map(|()| cfg))
        .map_err(CliError::from)
        .and_then(|cfg| execute(&action_name, &cfg, env::vars_os()));

    match outcome {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            error!(action = %action_name, "{err}");
            err.exit_code()
        }
    }
}

/// Determines the action from the program name, falling back to the first
/// argument when invoked as [`BIN_NAME`].
fn resolve_action(args: Vec<OsString>) -> Result<String, clap::Error> {
    let invoked_as = args
        .first()
        .and_then(|program| Path::new(program).file_name())
        .and_then(|name| name.to_str())
        .map(str::to_owned);

    match invoked_as.filter(|name| name != BIN_NAME) {
        Some(name) => Ok(name),
        None => Cli::try_parse_from(args).map(|cli| cli.action),
    }
}

fn report_usage(err: &clap::Error) -> i32 {
    err.print().ok();
    if err.use_stderr() {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    }
}

fn execute<I>(action_name: &str, settings: &AdapterConfig, vars: I) -> Result<(), CliError>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let action = action_name.parse::<Action>()?;
    let volume = VolumeConfig::from_vars(utf8_pairs(vars)).map_err(ActionError::from)?;

    let rbd = Rbd::with_process_runner(settings.rbd_bin.clone(), volume.auth.clone());
    let dispatcher = Dispatcher::new(rbd, settings.ceph_conf_path());
    if let Some(artifact) = dispatcher.run(action, &volume)? {
        write_artifact(io::stdout().lock(), &artifact)?;
    }
    Ok(())
}

/// Drops variables whose name or value is not valid UTF-8.
fn utf8_pairs<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

fn write_artifact(mut target: impl Write, artifact: &impl std::fmt::Display) -> io::Result<()> {
    write!(target, "{artifact}")?;
    target.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbd_extstorage::Artifact;
    use rstest::rstest;
    use std::sync::{Arc, Mutex};

    fn os_args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case::symlink("/usr/share/ganeti/extstorage/rbd/attach", "attach")]
    #[case::bare("detach", "detach")]
    #[case::unknown("/srv/provider/frobnicate", "frobnicate")]
    fn action_comes_from_program_name(#[case] program: &str, #[case] expected: &str) {
        let action = resolve_action(os_args(&[program])).expect("program name should resolve");
        assert_eq!(action, expected);
    }

    #[rstest]
    fn own_name_takes_action_from_argument() {
        let action = resolve_action(os_args(&["/usr/bin/rbd-extstorage", "grow"]))
            .expect("argument should resolve");
        assert_eq!(action, "grow");
    }

    #[rstest]
    fn own_name_without_action_is_a_usage_error() {
        let err = resolve_action(os_args(&["rbd-extstorage"])).expect_err("action is required");
        assert_eq!(report_usage(&err), EXIT_FAILURE);
    }

    #[rstest]
    fn help_exits_successfully() {
        let err = resolve_action(os_args(&["rbd-extstorage", "--help"])).expect_err("help short-circuits");
        assert_eq!(report_usage(&err), EXIT_SUCCESS);
    }

    #[rstest]
    fn utf8_pairs_skips_invalid_entries() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("VOL_CNAME"), OsString::from("disk0")),
            (OsString::from("EXTP_POOL"), OsString::from_vec(vec![0xff, 0xfe])),
        ];

        let pairs = utf8_pairs(vars).collect::<Vec<_>>();

        assert_eq!(pairs, vec![(String::from("VOL_CNAME"), String::from("disk0"))]);
    }

    #[rstest]
    fn unknown_action_fails_before_reading_parameters() {
        let settings = AdapterConfig {
            rbd_bin: String::from("/nonexistent/rbd"),
            ceph_conf: None,
            log_filter: String::from(DEFAULT_LOG_FILTER),
            log_json: false,
        };

        let err = execute("frobnicate", &settings, Vec::new()).expect_err("unknown action");

        assert!(
            matches!(err, CliError::Action(ActionError::UnrecognizedAction { ref name }) if name == "frobnicate"),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn missing_volume_name_is_reported() {
        let settings = AdapterConfig {
            rbd_bin: String::from("/nonexistent/rbd"),
            ceph_conf: None,
            log_filter: String::from(DEFAULT_LOG_FILTER),
            log_json: false,
        };

        let err = execute("verify", &settings, Vec::new()).expect_err("name is required");

        assert!(err.to_string().contains("VOL_CNAME"), "unexpected error: {err}");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("log buffer lock")).into_owned()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("log buffer lock").write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<T>(body: impl FnOnce() -> T) -> (T, String) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, body);
        (result, logs.contents())
    }

    #[rstest]
    fn guarded_returns_the_action_status() {
        assert_eq!(guarded(|| EXIT_SUCCESS), EXIT_SUCCESS);
    }

    #[rstest]
    #[case::static_str(|| -> i32 { panic!("rbd output exploded") }, "rbd output exploded")]
    #[case::formatted(|| -> i32 { panic!("device {} vanished", "/dev/rbd0") }, "device /dev/rbd0 vanished")]
    fn panics_exit_with_failure_and_log_the_payload(
        #[case] action: fn() -> i32,
        #[case] expected: &str,
    ) {
        let (code, logs) = capture(|| guarded(action));

        assert_eq!(code, EXIT_FAILURE);
        assert!(logs.contains("action aborted by an unexpected failure"), "logs: {logs}");
        assert!(logs.contains(expected), "logs: {logs}");
    }

    #[rstest]
    fn panic_hook_logs_a_backtrace() {
        install_panic_hook();
        let (code, logs) = capture(|| guarded(|| -> i32 { panic!("mapping table corrupt") }));
        drop(panic::take_hook());

        assert_eq!(code, EXIT_FAILURE);
        assert!(logs.contains("panic: "), "logs: {logs}");
        assert!(logs.contains("mapping table corrupt"), "logs: {logs}");
        assert!(logs.contains("backtrace="), "logs: {logs}");
    }

    #[rstest]
    fn write_artifact_emits_device_and_uri_without_trailing_newline() {
        let mut buf = Vec::new();
        let artifact = Artifact {
            device: String::from("/dev/rbd0"),
            uri: String::from("kvm:rbd:rbd/disk0"),
        };

        write_artifact(&mut buf, &artifact).expect("write should succeed");

        assert_eq!(String::from_utf8(buf).expect("utf8"), "/dev/rbd0\nkvm:rbd:rbd/disk0");
    }
}
