// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{Cause, FailureType};

/// Arguments passed to the fallback of a command.
///
/// This type is `#[non_exhaustive]` so that additional fields can be added in the future without
/// a breaking change.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct FallbackArgs {
    failure_type: FailureType,
    cause: Cause,
}

impl FallbackArgs {
    pub(crate) fn new(failure_type: FailureType, cause: Cause) -> Self {
        Self { failure_type, cause }
    }

    /// Why the command did not produce its primary result.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        self.failure_type
    }

    /// The error that triggered the fallback.
    ///
    /// For timeouts, rejections and short-circuits this is the corresponding marker error, such
    /// as [`TimedOut`][crate::TimedOut].
    #[must_use]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}
