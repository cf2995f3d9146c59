// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod define_fn_wrapper;

pub(crate) use define_fn_wrapper::define_fn_wrapper;
