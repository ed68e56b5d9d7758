// Tether Linux Sandbox Helper
// Restricts itself with landlock, then execs the given command

use std::path::PathBuf;

use clap::Parser;
use tether_linux_sandbox::{LandlockPolicy, SETUP_FAILURE_EXIT_CODE, restrict_current_process};

#[derive(Parser, Debug)]
#[command(name = "tether-linux-sandbox")]
#[command(version, about = "Run a command under landlock restrictions")]
struct SandboxCli {
    /// Directory the command may write to (repeatable)
    #[arg(long = "writable", value_name = "DIR")]
    writable: Vec<PathBuf>,

    /// Directory the command may read when reads are scoped (repeatable)
    #[arg(long = "readable", value_name = "DIR")]
    readable: Vec<PathBuf>,

    /// Allow reads anywhere on the filesystem
    #[arg(long = "read-anywhere")]
    read_anywhere: bool,

    /// Refuse TCP bind and connect
    #[arg(long = "deny-network")]
    deny_network: bool,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn main() {
    let cli = SandboxCli::parse();
    let policy = LandlockPolicy {
        writable_roots: cli.writable,
        readable_roots: cli.readable,
        read_anywhere: cli.read_anywhere,
        deny_network: cli.deny_network,
    };

    if let Err(err) = restrict_current_process(&policy) {
        eprintln!("tether-linux-sandbox: {err}");
        std::process::exit(SETUP_FAILURE_EXIT_CODE);
    }

    let err = exec(&cli.command);
    eprintln!("tether-linux-sandbox: failed to exec {}: {err}", cli.command[0]);
    std::process::exit(if err.kind() == std::io::ErrorKind::NotFound { 127 } else { 126 });
}

#[cfg(unix)]
fn exec(command: &[String]) -> std::io::Error {
    use std::os::unix::process::CommandExt;

    std::process::Command::new(&command[0])
        .args(&command[1..])
        .exec()
}

#[cfg(not(unix))]
fn exec(_command: &[String]) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Unsupported, "exec is only available on unix")
}
