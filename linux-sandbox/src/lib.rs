//! Landlock restrictions for the `RestrictiveOS` sandbox strategy.
//!
//! The helper binary applies a [`LandlockPolicy`] to itself and then `exec`s
//! the target command, which inherits the restrictions.

use std::path::PathBuf;

use thiserror::Error;

/// Directories a restricted process can always read so that ordinary
/// binaries still start.
pub const SYSTEM_READ_ROOTS: &[&str] = &["/bin", "/usr", "/lib", "/lib64", "/etc", "/proc", "/dev"];

/// Exit code the helper uses when it could not set up the sandbox.
pub const SETUP_FAILURE_EXIT_CODE: i32 = 125;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandlockPolicy {
  pub writable_roots: Vec<PathBuf>,
  pub readable_roots: Vec<PathBuf>,
  pub read_anywhere: bool,
  pub deny_network: bool,
}

impl LandlockPolicy {
  /// Paths that get read access, `/` when reads are unrestricted.
  pub fn read_paths(&self) -> Vec<PathBuf> {
    if self.read_anywhere {
      return vec![PathBuf::from("/")];
    }
    let mut paths: Vec<PathBuf> = SYSTEM_READ_ROOTS.iter().map(PathBuf::from).collect();
    paths.extend(self.readable_roots.iter().cloned());
    paths.extend(self.writable_roots.iter().cloned());
    paths.retain(|path| path.exists());
    paths
  }

  /// Paths that get full access.
  pub fn write_paths(&self) -> Vec<PathBuf> {
    let mut paths = self.writable_roots.clone();
    paths.push(PathBuf::from("/dev/null"));
    paths.retain(|path| path.exists());
    paths
  }
}

#[derive(Debug, Error)]
pub enum LandlockError {
  #[cfg(target_os = "linux")]
  #[error("landlock ruleset error: {0}")]
  Ruleset(#[from] landlock::RulesetError),

  #[error("kernel does not enforce landlock")]
  NotEnforced,

  #[error("kernel cannot restrict TCP (landlock ABI 4 or newer is needed to deny the network)")]
  NetworkUnsupported,

  #[error("landlock is only available on linux")]
  Unsupported,
}

/// Build the ruleset for `policy` without applying it.
///
/// Filesystem rights degrade to what the kernel supports. Network denial
/// does not: a kernel that cannot handle TCP rights fails the build.
#[cfg(target_os = "linux")]
pub fn build_ruleset(policy: &LandlockPolicy) -> Result<landlock::RulesetCreated, LandlockError> {
  use landlock::{
    ABI, Access, AccessFs, AccessNet, CompatLevel, Compatible, Ruleset, RulesetAttr,
    RulesetCreatedAttr, path_beneath_rules,
  };

  let abi = ABI::V5;
  let mut ruleset = Ruleset::default().handle_access(AccessFs::from_all(abi))?;
  if policy.deny_network {
    // Handled with no allow rules, so every TCP bind/connect is refused.
    ruleset = ruleset
      .set_compatibility(CompatLevel::HardRequirement)
      .handle_access(AccessNet::BindTcp | AccessNet::ConnectTcp)
      .map_err(|_| LandlockError::NetworkUnsupported)?
      .set_compatibility(CompatLevel::BestEffort);
  }

  Ok(
    ruleset
      .create()?
      .add_rules(path_beneath_rules(
        policy.read_paths(),
        AccessFs::from_read(abi),
      ))?
      .add_rules(path_beneath_rules(
        policy.write_paths(),
        AccessFs::from_all(abi),
      ))?,
  )
}

/// Restrict the calling thread (and everything it later `exec`s).
#[cfg(target_os = "linux")]
pub fn restrict_current_process(policy: &LandlockPolicy) -> Result<(), LandlockError> {
  use landlock::RulesetStatus;

  let status = build_ruleset(policy)?.restrict_self()?;

  if status.ruleset == RulesetStatus::NotEnforced {
    return Err(LandlockError::NotEnforced);
  }
  tracing::debug!(status = ?status.ruleset, "landlock restrictions applied");
  Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn restrict_current_process(_policy: &LandlockPolicy) -> Result<(), LandlockError> {
  Err(LandlockError::Unsupported)
}
