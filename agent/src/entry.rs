//! The process-creation entry points spawnhook intercepts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Shared C signature of `posix_spawn` and `posix_spawnp`.
pub type PosixSpawnFn = unsafe extern "C" fn(
    *mut libc::pid_t,
    *const libc::c_char,
    *const libc::posix_spawn_file_actions_t,
    *const libc::posix_spawnattr_t,
    *const *mut libc::c_char,
    *const *mut libc::c_char,
) -> libc::c_int;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    /// `posix_spawn`: takes a program path, no PATH lookup.
    PosixSpawn,
    /// `posix_spawnp`: searches PATH for the program.
    PosixSpawnp,
}

impl EntryPoint {
    pub const COUNT: usize = 2;
    pub const ALL: [EntryPoint; EntryPoint::COUNT] = [EntryPoint::PosixSpawn, EntryPoint::PosixSpawnp];

    pub fn symbol(self) -> &'static str {
        match self {
            EntryPoint::PosixSpawn => "posix_spawn",
            EntryPoint::PosixSpawnp => "posix_spawnp",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            EntryPoint::PosixSpawn => 0,
            EntryPoint::PosixSpawnp => 1,
        }
    }

    /// Address of the interceptor installed in place of this entry point.
    pub fn replacement(self) -> usize {
        match self {
            EntryPoint::PosixSpawn => crate::interceptor::hooked_posix_spawn as *const () as usize,
            EntryPoint::PosixSpawnp => crate::interceptor::hooked_posix_spawnp as *const () as usize,
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for EntryPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posix_spawn" => Ok(EntryPoint::PosixSpawn),
            "posix_spawnp" => Ok(EntryPoint::PosixSpawnp),
            other => Err(format!(
                "unknown entry point '{}'. Available: posix_spawn, posix_spawnp",
                other
            )),
        }
    }
}
