//! Launching scripted commands through the spawn entry points.
//!
//! `PosixLauncher` resolves the program on PATH, then calls `posix_spawn`
//! or `posix_spawnp` either through the linked symbols (redirected by the
//! rebind engine) or through a [`DispatchTable`] (redirected by the table
//! engine). Children get `/dev/null` for their standard streams.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use log::debug;
use spawnhook_agent::{EntryPoint, PosixSpawnFn};
use spawnhook_intercept::DispatchTable;
use thiserror::Error;

use crate::shell_format::{format_shell_command, split_command, CommandError};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),

    #[error("argument contains a null byte: {0:?}")]
    NulByte(String),

    #[error("program '{0}' not found in PATH")]
    NotFound(String),

    #[error("no {0} slot in the dispatch table")]
    NoSlot(EntryPoint),

    #[error("{entry} failed for '{program}': {source}")]
    Spawn {
        entry: EntryPoint,
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Whether the entry point was called before the launch failed.
    pub fn reached_entry(&self) -> bool {
        matches!(self, LaunchError::Spawn { .. })
    }
}

/// A started child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub pid: libc::pid_t,
    pub program: PathBuf,
}

pub trait Launcher {
    fn launch(&self, entry: EntryPoint, command: &str) -> Result<Launch, LaunchError>;

    /// Kill and reap `pid`. A child that already exited is not an error.
    fn terminate(&self, pid: libc::pid_t) -> std::io::Result<()>;
}

/// How [`PosixLauncher`] reaches the entry points.
#[derive(Debug, Clone)]
pub enum SpawnRoute {
    /// Call the symbols this binary links against.
    Linked,
    /// Call whatever the table currently holds for each symbol.
    Table(Arc<DispatchTable>),
}

#[derive(Debug, Clone)]
pub struct PosixLauncher {
    route: SpawnRoute,
}

impl PosixLauncher {
    pub fn new(route: SpawnRoute) -> Self {
        Self { route }
    }

    fn entry_function(&self, entry: EntryPoint) -> Result<PosixSpawnFn, LaunchError> {
        match &self.route {
            SpawnRoute::Linked => Ok(match entry {
                EntryPoint::PosixSpawn => libc::posix_spawn,
                EntryPoint::PosixSpawnp => libc::posix_spawnp,
            }),
            SpawnRoute::Table(table) => {
                // SAFETY: slots are only ever filled with posix_spawn-compatible functions.
                unsafe { table.function::<PosixSpawnFn>(entry.symbol()) }
                    .ok_or(LaunchError::NoSlot(entry))
            }
        }
    }
}

impl Launcher for PosixLauncher {
    fn launch(&self, entry: EntryPoint, command: &str) -> Result<Launch, LaunchError> {
        let args = split_command(command)?;
        let program = resolve_program_path(&args[0])?;
        let f = self.entry_function(entry)?;

        // posix_spawn takes a path, posix_spawnp searches PATH itself.
        let target = match entry {
            EntryPoint::PosixSpawn => program.to_string_lossy().into_owned(),
            EntryPoint::PosixSpawnp => args[0].clone(),
        };
        let block = SpawnBlock::new(&target, &args)?;

        debug!("Calling {} with: {}", entry, format_shell_command(&args));
        let pid = block.spawn(f).map_err(|source| LaunchError::Spawn {
            entry,
            program: target.clone(),
            source,
        })?;
        debug!("Spawned '{}' with PID {}", target, pid);
        Ok(Launch { pid, program })
    }

    fn terminate(&self, pid: libc::pid_t) -> std::io::Result<()> {
        // ESRCH means the child is already gone; it still needs reaping.
        if unsafe { libc::kill(pid, libc::SIGKILL) } != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        let mut status: libc::c_int = 0;
        loop {
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            if ret == pid {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(()),
                _ => return Err(err),
            }
        }
    }
}

/// Resolve a program name to an executable path by searching PATH.
///
/// Names containing a `/` are checked as given.
pub fn resolve_program_path(program: &str) -> Result<PathBuf, LaunchError> {
    if program.contains('/') {
        let path = Path::new(program);
        return if is_executable(path) {
            Ok(path.to_path_buf())
        } else {
            Err(LaunchError::NotFound(program.to_string()))
        };
    }
    find_in_path(program).ok_or_else(|| LaunchError::NotFound(program.to_string()))
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    std::env::var_os("PATH")?
        .to_str()?
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| PathBuf::from(dir).join(program))
        .find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Owned C argument block for one spawn call.
struct SpawnBlock {
    target: CString,
    _argv_storage: Vec<CString>,
    _env_storage: Vec<CString>,
    argv: Vec<*mut libc::c_char>,
    envp: Vec<*mut libc::c_char>,
}

impl SpawnBlock {
    fn new(target: &str, args: &[String]) -> Result<Self, LaunchError> {
        let cstring = |s: &str| CString::new(s).map_err(|_| LaunchError::NulByte(s.to_string()));

        let target = cstring(target)?;
        let argv_storage = args
            .iter()
            .map(|a| cstring(a.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let env_storage: Vec<CString> = std::env::vars_os()
            .filter_map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry).ok()
            })
            .collect();

        let mut argv: Vec<*mut libc::c_char> = argv_storage
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        argv.push(ptr::null_mut());
        let mut envp: Vec<*mut libc::c_char> = env_storage
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        envp.push(ptr::null_mut());

        Ok(Self {
            target,
            _argv_storage: argv_storage,
            _env_storage: env_storage,
            argv,
            envp,
        })
    }

    fn spawn(&self, f: PosixSpawnFn) -> std::io::Result<libc::pid_t> {
        let actions = FileActions::devnull()?;
        let mut pid: libc::pid_t = 0;
        let ret = unsafe {
            f(
                &mut pid,
                self.target.as_ptr(),
                actions.as_ptr(),
                ptr::null(),
                self.argv.as_ptr(),
                self.envp.as_ptr(),
            )
        };
        if ret != 0 {
            return Err(std::io::Error::from_raw_os_error(ret));
        }
        Ok(pid)
    }
}

/// File actions pointing the child's stdin, stdout and stderr at `/dev/null`.
struct FileActions {
    raw: Box<libc::posix_spawn_file_actions_t>,
}

impl FileActions {
    fn devnull() -> std::io::Result<Self> {
        let mut raw: Box<libc::posix_spawn_file_actions_t> =
            Box::new(unsafe { std::mem::zeroed() });
        let ret = unsafe { libc::posix_spawn_file_actions_init(raw.as_mut()) };
        if ret != 0 {
            return Err(std::io::Error::from_raw_os_error(ret));
        }
        let mut actions = Self { raw };
        let devnull = c"/dev/null";
        for (fd, flags) in [
            (libc::STDIN_FILENO, libc::O_RDONLY),
            (libc::STDOUT_FILENO, libc::O_WRONLY),
            (libc::STDERR_FILENO, libc::O_WRONLY),
        ] {
            let ret = unsafe {
                libc::posix_spawn_file_actions_addopen(
                    actions.raw.as_mut(),
                    fd,
                    devnull.as_ptr(),
                    flags,
                    0,
                )
            };
            if ret != 0 {
                return Err(std::io::Error::from_raw_os_error(ret));
            }
        }
        Ok(actions)
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        self.raw.as_ref()
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(self.raw.as_mut());
        }
    }
}
