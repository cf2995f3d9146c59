// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt::Display;

macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(any(feature = "serde", test), serde(transparent))]
        pub struct $name(Cow<'static, str>);

        impl $name {
            /// Creates a key from a static or owned string.
            #[must_use]
            pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
                Self(name.into())
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&'static str> for $name {
            fn from(value: &'static str) -> Self {
                Self(Cow::Borrowed(value))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Cow::Owned(value))
            }
        }
    };
}

define_key!(
    /// Identifies a command.
    ///
    /// Circuit breakers, metrics and semaphores are partitioned by this key: every command
    /// built with the same key shares those resources within one [`Context`][crate::Context].
    CommandKey
);

define_key!(
    /// Groups related commands, typically by the dependency they call.
    ///
    /// When no [`PoolKey`] is configured, the group key selects the worker pool.
    GroupKey
);

define_key!(
    /// Selects the worker pool used by thread-isolated commands.
    PoolKey
);

impl From<&CommandKey> for GroupKey {
    fn from(value: &CommandKey) -> Self {
        Self(value.0.clone())
    }
}

impl From<&GroupKey> for PoolKey {
    fn from(value: &GroupKey) -> Self {
        Self(value.0.clone())
    }
}

/// The identity of a command, as seen by hooks and telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct CommandInfo {
    /// The command key.
    pub command_key: CommandKey,
    /// The group key.
    pub group_key: GroupKey,
    /// The pool key.
    pub pool_key: PoolKey,
    /// How the command isolates its executions.
    pub isolation: crate::IsolationStrategy,
}

impl CommandInfo {
    pub(crate) fn new(command_key: CommandKey, group_key: GroupKey, pool_key: PoolKey, isolation: crate::IsolationStrategy) -> Self {
        Self {
            command_key,
            group_key,
            pool_key,
            isolation,
        }
    }
}
