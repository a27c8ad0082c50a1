// src/child/spawn.rs

use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Build a process factory for a plain program invocation.
///
/// The returned closure spawns the program with all three stdio streams
/// piped (the wire the cluster speaks over) and `kill_on_drop` armed so an
/// abandoned runtime cannot leak children.
///
/// Callers with fancier needs (env vars, working directories, wrappers)
/// supply their own `FnMut() -> io::Result<Child>` instead.
pub fn command_factory<I, S>(
    program: impl Into<String>,
    args: I,
) -> impl FnMut() -> io::Result<Child> + Send
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let program = program.into();
    let args: Vec<String> = args.into_iter().map(Into::into).collect();

    move || {
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn()
    }
}
