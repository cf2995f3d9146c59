// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Generates a cloneable wrapper around an `Arc<dyn Fn ...>`.
///
/// User-supplied closures (fallbacks, cache key functions) are stored in commands that are shared
/// across tasks, so they must be `Send + Sync` and cheap to clone.
///
/// ```rust,ignore
/// define_fn_wrapper!(CacheKeyFn<In>(Fn(input: &In) -> Option<String>));
/// ```
///
/// The generated type has `new`, `call`, `Clone` and an opaque `Debug`.
macro_rules! define_fn_wrapper {
    ($name:ident<$($generics:ident),*>(Fn($($param_name:ident: $param_ty:ty),*) -> $return_ty:ty)) => {
        pub(crate) struct $name<$($generics),*>(std::sync::Arc<dyn Fn($($param_ty),*) -> $return_ty + Send + Sync>);

        impl<$($generics),*> $name<$($generics),*> {
            pub(crate) fn new<F>(f: F) -> Self
            where
                F: Fn($($param_ty),*) -> $return_ty + Send + Sync + 'static,
            {
                Self(std::sync::Arc::new(f))
            }

            pub(crate) fn call(&self, $($param_name: $param_ty),*) -> $return_ty {
                (self.0)($($param_name),*)
            }
        }

        impl<$($generics),*> Clone for $name<$($generics),*> {
            fn clone(&self) -> Self {
                Self(std::sync::Arc::clone(&self.0))
            }
        }

        impl<$($generics),*> std::fmt::Debug for $name<$($generics),*> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).finish()
            }
        }
    };
}

pub(crate) use define_fn_wrapper;
