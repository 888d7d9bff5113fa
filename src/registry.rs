/// Compile-time registry of denied process-control primitives
///
/// Every primitive the preload library can override is registered here once.
/// The registration macro generates the `BlockedOperation` enum together with
/// its symbol, family and diagnostic tables, so adding a denial is one line.
use crate::error::{NospawnError, Result};
#[cfg(feature = "launcher")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exit status of a process terminated by a denial
pub const DENIED_EXIT_CODE: i32 = 1;

/// Suffix shared by every diagnostic line
const DIAGNOSTIC_SUFFIX: &str = " not allowed";

/// Group of sibling primitives that share one escape route
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "launcher",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Family {
    /// Duplicate the calling process into a child
    Fork,
    /// Replace the calling process image with a new program
    Exec,
    /// Create a child already running a new program
    Spawn,
    /// Create a child sharing parts of the caller's context
    Clone,
}

impl Family {
    pub const ALL: &'static [Family] = &[Family::Fork, Family::Exec, Family::Spawn, Family::Clone];

    pub const fn name(self) -> &'static str {
        match self {
            Family::Fork => "fork",
            Family::Exec => "exec",
            Family::Spawn => "spawn",
            Family::Clone => "clone",
        }
    }

    /// Cargo feature of `nospawn-preload` that compiles the non-core members
    pub const fn feature(self) -> &'static str {
        match self {
            Family::Fork => "fork-family",
            Family::Exec => "exec-family",
            Family::Spawn => "spawn-family",
            Family::Clone => "clone",
        }
    }

    /// Whether the family's feature is part of the preload library's default set
    pub const fn is_default(self) -> bool {
        !matches!(self, Family::Clone)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Family {
    type Err = NospawnError;

    fn from_str(s: &str) -> Result<Self> {
        Family::ALL
            .iter()
            .copied()
            .find(|family| family.name() == s)
            .ok_or_else(|| NospawnError::Config(format!("Unknown operation family: {}", s)))
    }
}

macro_rules! blocked_operations {
    ($( $(#[$meta:meta])* $variant:ident => $symbol:literal, $family:ident, core = $core:literal; )+) => {
        /// A primitive whose invocation terminates the caller
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[cfg_attr(
            feature = "launcher",
            derive(Serialize, Deserialize),
            serde(try_from = "String", into = "String")
        )]
        pub enum BlockedOperation {
            $( $(#[$meta])* $variant, )+
        }

        impl BlockedOperation {
            /// Every registered operation, in registration order
            pub const ALL: &'static [BlockedOperation] = &[ $( BlockedOperation::$variant, )+ ];

            /// Symbol name the preload library exports for this operation
            pub const fn symbol(self) -> &'static str {
                match self {
                    $( BlockedOperation::$variant => $symbol, )+
                }
            }

            pub const fn family(self) -> Family {
                match self {
                    $( BlockedOperation::$variant => Family::$family, )+
                }
            }

            /// Line written to standard output before termination, newline included
            pub const fn diagnostic(self) -> &'static str {
                match self {
                    $( BlockedOperation::$variant => concat!($symbol, " not allowed\n"), )+
                }
            }

            /// Core operations are compiled into every build of the preload library
            pub const fn is_core(self) -> bool {
                match self {
                    $( BlockedOperation::$variant => $core, )+
                }
            }
        }
    };
}

blocked_operations! {
    Fork => "fork", Fork, core = true;
    Vfork => "vfork", Fork, core = true;
    /// glibc 2.34+ async-signal-safe fork without atfork handlers
    UnderscoreFork => "_Fork", Fork, core = false;
    Execve => "execve", Exec, core = true;
    Execv => "execv", Exec, core = false;
    Execvp => "execvp", Exec, core = false;
    Execvpe => "execvpe", Exec, core = false;
    Execl => "execl", Exec, core = false;
    Execlp => "execlp", Exec, core = false;
    Execle => "execle", Exec, core = false;
    Fexecve => "fexecve", Exec, core = false;
    Execveat => "execveat", Exec, core = false;
    PosixSpawn => "posix_spawn", Spawn, core = false;
    PosixSpawnp => "posix_spawnp", Spawn, core = false;
    System => "system", Spawn, core = false;
    Popen => "popen", Spawn, core = false;
    Clone => "clone", Clone, core = false;
}

impl BlockedOperation {
    /// Exit status used when this operation is denied
    pub const fn exit_code(self) -> i32 {
        DENIED_EXIT_CODE
    }

    /// Whether the preload library built with default features overrides this operation
    pub const fn is_default(self) -> bool {
        self.is_core() || self.family().is_default()
    }

    pub fn in_family(self, family: Family) -> bool {
        self.family() == family
    }

    /// Recognise the operation named by a diagnostic line such as `"fork not allowed"`
    pub fn from_diagnostic(line: &str) -> Option<Self> {
        let name = line.trim_end_matches(&['\r', '\n'][..]).strip_suffix(DIAGNOSTIC_SUFFIX)?;
        name.parse().ok()
    }
}

impl fmt::Display for BlockedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.symbol())
    }
}

impl FromStr for BlockedOperation {
    type Err = NospawnError;

    fn from_str(s: &str) -> Result<Self> {
        BlockedOperation::ALL
            .iter()
            .copied()
            .find(|op| op.symbol() == s)
            .ok_or_else(|| NospawnError::UnknownOperation(s.to_string()))
    }
}

impl TryFrom<String> for BlockedOperation {
    type Error = NospawnError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BlockedOperation> for String {
    fn from(op: BlockedOperation) -> Self {
        op.symbol().to_string()
    }
}
