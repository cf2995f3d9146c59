// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use futures::future::BoxFuture;

use super::FallbackArgs;
use crate::RunError;

crate::utils::define_fn_wrapper!(CacheKeyFn<In>(Fn(input: &In) -> Option<String>));

crate::utils::define_fn_wrapper!(SyncFallbackFn<Out>(Fn(args: FallbackArgs) -> Result<Out, RunError>));
crate::utils::define_fn_wrapper!(AsyncFallbackFn<Out>(Fn(args: FallbackArgs) -> BoxFuture<'static, Result<Out, RunError>>));

/// Wraps either a sync or async user-supplied fallback function.
///
/// A synchronous fallback is invoked directly without boxing a future, while an async fallback
/// produces a boxed future that is `.await`ed.
#[derive(Debug)]
pub(crate) enum FallbackAction<Out> {
    Sync(SyncFallbackFn<Out>),
    Async(AsyncFallbackFn<Out>),
}

impl<Out: Send + 'static> FallbackAction<Out> {
    pub(crate) fn new_sync(f: impl Fn(FallbackArgs) -> Result<Out, RunError> + Send + Sync + 'static) -> Self {
        Self::Sync(SyncFallbackFn::new(f))
    }

    pub(crate) fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(FallbackArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, RunError>> + Send + 'static,
    {
        Self::Async(AsyncFallbackFn::new(move |args| Box::pin(f(args))))
    }

    pub(crate) async fn call(&self, args: FallbackArgs) -> Result<Out, RunError> {
        match self {
            Self::Sync(f) => f.call(args),
            Self::Async(f) => f.call(args).await,
        }
    }
}

impl<Out> Clone for FallbackAction<Out> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(f.clone()),
            Self::Async(f) => Self::Async(f.clone()),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cause, FailureType, ShortCircuited};

    fn args() -> FallbackArgs {
        FallbackArgs::new(FailureType::ShortCircuit, Cause::new(ShortCircuited))
    }

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(FallbackAction<String>: Send, Sync, Clone, std::fmt::Debug);
        static_assertions::assert_impl_all!(CacheKeyFn<u64>: Send, Sync, Clone);
    }

    #[tokio::test]
    async fn sync_fallback() {
        let action = FallbackAction::new_sync(|args: FallbackArgs| Ok(args.failure_type().as_str().to_string()));

        assert_eq!(action.call(args()).await.unwrap(), "short_circuit");
    }

    #[tokio::test]
    async fn async_fallback() {
        let action = FallbackAction::<String>::new_async(|_args| async { Err(RunError::failure("no cached value")) });

        let error = action.clone().call(args()).await.unwrap_err();
        assert_eq!(error.to_string(), "no cached value");
    }

    #[test]
    fn cache_key() {
        let key = CacheKeyFn::new(|id: &u64| (*id != 0).then(|| id.to_string()));

        assert_eq!(key.call(&7), Some("7".to_string()));
        assert_eq!(key.call(&0), None);
    }
}
