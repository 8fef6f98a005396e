// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route handlers.

/// Deploy CRUD and rollback.
pub mod functions;
/// Auth introspection.
pub mod introspect;
/// Invoke and cascade paths.
pub mod invoke;
