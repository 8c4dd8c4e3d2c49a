// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use std::env;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

/// Compiler debug options, set from the `BIFROST_MESA_DEBUG` environment
/// variable as a comma-separated list of names.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags(u32);

impl DebugFlags {
    /// Print debug messages
    pub const MSGS: DebugFlags = DebugFlags(1 << 0);
    /// Dump shaders after scoreboarding
    pub const SHADERS: DebugFlags = DebugFlags(1 << 1);
    /// Disable scoreboarding
    pub const NOSB: DebugFlags = DebugFlags(1 << 2);

    const OPTIONS: [(&'static str, DebugFlags); 3] = [
        ("msgs", DebugFlags::MSGS),
        ("shaders", DebugFlags::SHADERS),
        ("nosb", DebugFlags::NOSB),
    ];

    pub const fn empty() -> DebugFlags {
        DebugFlags(0)
    }

    pub const fn with(self, other: DebugFlags) -> DebugFlags {
        DebugFlags(self.0 | other.0)
    }

    pub const fn contains(&self, other: DebugFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parses a comma-separated list of option names.
    ///
    /// Unknown names are reported and skipped.
    pub fn parse(list: &str) -> DebugFlags {
        let mut flags = DebugFlags::empty();
        for name in list.split(',').map(str::trim) {
            if name.is_empty() {
                continue;
            }
            match Self::OPTIONS.iter().find(|(n, _)| *n == name) {
                Some((_, flag)) => flags = flags.with(*flag),
                None => warn!("Unknown BIFROST_MESA_DEBUG flag found: {name}"),
            }
        }
        flags
    }

    fn from_env() -> DebugFlags {
        match env::var("BIFROST_MESA_DEBUG") {
            Ok(list) => DebugFlags::parse(&list),
            Err(_) => DebugFlags::empty(),
        }
    }
}

impl fmt::Debug for DebugFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = Self::OPTIONS
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name);
        f.debug_set().entries(names).finish()
    }
}

pub trait GetDebugFlags {
    fn debug_flags(&self) -> DebugFlags;

    fn msgs(&self) -> bool {
        self.debug_flags().contains(DebugFlags::MSGS)
    }

    fn shaders(&self) -> bool {
        self.debug_flags().contains(DebugFlags::SHADERS)
    }

    fn nosb(&self) -> bool {
        self.debug_flags().contains(DebugFlags::NOSB)
    }
}

impl GetDebugFlags for DebugFlags {
    fn debug_flags(&self) -> DebugFlags {
        *self
    }
}

/// Process-wide debug flags, read from the environment on first use
pub static DEBUG: LazyLock<DebugFlags> = LazyLock::new(DebugFlags::from_env);
