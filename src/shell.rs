//! Start task command lines
//!
//! Batch runs a start task's command line without a shell, so a list of
//! commands has to be folded into a single interpreter invocation.

use crate::models::OsType;
use crate::Result;

/// Wrap `commands` for the OS named by `os_type` (case-insensitive).
pub fn wrap_commands<S: AsRef<str>>(os_type: &str, commands: &[S]) -> Result<String> {
    let os: OsType = os_type.parse()?;
    Ok(os.wrap_commands(commands))
}

impl OsType {
    /// Linux scripts stop at the first failing command. `cmd.exe` has no
    /// equivalent of `errexit`, so on Windows later commands still run.
    pub fn wrap_commands<S: AsRef<str>>(&self, commands: &[S]) -> String {
        let commands: Vec<&str> = commands.iter().map(AsRef::as_ref).collect();
        match self {
            OsType::Linux => format!("/bin/bash -c 'set -e; set -o pipefail; {}'", commands.join(";")),
            OsType::Windows => format!("cmd.exe /c {}", commands.join(" & ")),
        }
    }
}
