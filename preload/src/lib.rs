//! LD_PRELOAD library denying process creation
//!
//! Every exported function shadows a libc primitive of the same name. Calling
//! one prints `"<name> not allowed"` on standard output and ends the process
//! with [`nospawn::DENIED_EXIT_CODE`]; arguments are never read.
//!
//! `fork`, `vfork` and `execve` are always exported. The remaining members of
//! each family sit behind the `fork-family`, `exec-family`, `spawn-family` and
//! `clone` features.
//!
//! Only call sites that resolve these names through the dynamic loader are
//! covered. Raw syscalls, statically linked programs, setuid programs (the
//! loader drops `LD_PRELOAD` for them) and libc-internal aliases such as
//! `__fork` bypass the library.
//!
//! Variadic primitives (`execl`, `execlp`, `execle`, `clone`) are declared with
//! their fixed parameters only. Nothing is read from the argument registers, so
//! the variadic tail passed by the caller is irrelevant.

use nospawn::{BlockedOperation, Family};

/// Exports one denial per entry and checks at compile time that the exported
/// name, family and core flag agree with the registry entry it denies.
macro_rules! deny_symbols {
    (
        $table:ident, family = $family:ident, core = $core:literal, cfg = ($gate:meta);
        $( $op:ident => fn $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty; )+
    ) => {
        $(
            #[doc = concat!("Denies `", stringify!($name), "`: prints the diagnostic and exits.")]
            ///
            /// # Safety
            ///
            /// Arguments are never dereferenced; any value is accepted.
            #[cfg(all(target_os = "linux", not(test), $gate))]
            #[no_mangle]
            #[allow(non_snake_case)]
            pub unsafe extern "C" fn $name($($arg: $ty),*) -> $ret {
                nospawn::deny(BlockedOperation::$op)
            }

            const _: () = assert!(
                same_symbol(stringify!($name), BlockedOperation::$op.symbol())
                    && matches!(BlockedOperation::$op.family(), Family::$family)
                    && BlockedOperation::$op.is_core() == $core
            );
        )+

        #[cfg(test)]
        const $table: &[BlockedOperation] = &[ $( BlockedOperation::$op, )+ ];
    };
}

const fn same_symbol(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

deny_symbols! {
    FORK_CORE, family = Fork, core = true, cfg = (all());
    Fork => fn fork() -> libc::pid_t;
    Vfork => fn vfork() -> libc::pid_t;
}

deny_symbols! {
    EXEC_CORE, family = Exec, core = true, cfg = (all());
    Execve => fn execve(
        _path: *const libc::c_char,
        _argv: *const *const libc::c_char,
        _envp: *const *const libc::c_char
    ) -> libc::c_int;
}

deny_symbols! {
    FORK_FAMILY, family = Fork, core = false, cfg = (feature = "fork-family");
    UnderscoreFork => fn _Fork() -> libc::pid_t;
}

deny_symbols! {
    EXEC_FAMILY, family = Exec, core = false, cfg = (feature = "exec-family");
    Execv => fn execv(_path: *const libc::c_char, _argv: *const *const libc::c_char) -> libc::c_int;
    Execvp => fn execvp(_file: *const libc::c_char, _argv: *const *const libc::c_char) -> libc::c_int;
    Execvpe => fn execvpe(
        _file: *const libc::c_char,
        _argv: *const *const libc::c_char,
        _envp: *const *const libc::c_char
    ) -> libc::c_int;
    Execl => fn execl(_path: *const libc::c_char, _arg: *const libc::c_char) -> libc::c_int;
    Execlp => fn execlp(_file: *const libc::c_char, _arg: *const libc::c_char) -> libc::c_int;
    Execle => fn execle(_path: *const libc::c_char, _arg: *const libc::c_char) -> libc::c_int;
    Fexecve => fn fexecve(
        _fd: libc::c_int,
        _argv: *const *const libc::c_char,
        _envp: *const *const libc::c_char
    ) -> libc::c_int;
    Execveat => fn execveat(
        _dirfd: libc::c_int,
        _path: *const libc::c_char,
        _argv: *const *const libc::c_char,
        _envp: *const *const libc::c_char,
        _flags: libc::c_int
    ) -> libc::c_int;
}

deny_symbols! {
    SPAWN_FAMILY, family = Spawn, core = false, cfg = (feature = "spawn-family");
    PosixSpawn => fn posix_spawn(
        _pid: *mut libc::pid_t,
        _path: *const libc::c_char,
        _file_actions: *const libc::c_void,
        _attrp: *const libc::c_void,
        _argv: *const *const libc::c_char,
        _envp: *const *const libc::c_char
    ) -> libc::c_int;
    PosixSpawnp => fn posix_spawnp(
        _pid: *mut libc::pid_t,
        _file: *const libc::c_char,
        _file_actions: *const libc::c_void,
        _attrp: *const libc::c_void,
        _argv: *const *const libc::c_char,
        _envp: *const *const libc::c_char
    ) -> libc::c_int;
    System => fn system(_command: *const libc::c_char) -> libc::c_int;
    Popen => fn popen(_command: *const libc::c_char, _mode: *const libc::c_char) -> *mut libc::FILE;
}

deny_symbols! {
    CLONE_FAMILY, family = Clone, core = false, cfg = (feature = "clone");
    Clone => fn clone(
        _func: *const libc::c_void,
        _stack: *mut libc::c_void,
        _flags: libc::c_int,
        _arg: *mut libc::c_void
    ) -> libc::c_int;
}

/// Whether this build of the library overrides `op`
pub const fn is_enabled(op: BlockedOperation) -> bool {
    if op.is_core() {
        return true;
    }
    match op.family() {
        Family::Fork => cfg!(feature = "fork-family"),
        Family::Exec => cfg!(feature = "exec-family"),
        Family::Spawn => cfg!(feature = "spawn-family"),
        Family::Clone => cfg!(feature = "clone"),
    }
}

/// Operations overridden by this build, in registry order
pub fn enabled() -> impl Iterator<Item = BlockedOperation> {
    BlockedOperation::ALL.iter().copied().filter(|op| is_enabled(*op))
}
