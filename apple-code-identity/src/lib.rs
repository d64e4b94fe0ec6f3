// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code identities on Apple platforms.
//!
//! This crate resolves *code identities* (running processes and the on-disk
//! code they were loaded from), validates them against code requirements,
//! retrieves their signing information, and applies a couple of policy checks
//! to that information.
//!
//! Signature verification, certificate evaluation, and compilation of the code
//! requirement language are all performed by the operating system's code
//! signing services. This crate does not attempt to reimplement any of them.
//! The boundary to those services is the [CodeSigningOracle] trait, which is
//! implemented by [SecurityFrameworkOracle] on macOS.
//!
//! # Getting Started
//!
//! [CodeIdentityResolver] is the entry point. On macOS,
//! [CodeIdentityResolver::system()] binds it to `Security.framework`.
//!
//! A typical flow resolves an identity, optionally validates it against a
//! requirement (see [requirement] for canned expressions), fetches its
//! [SigningInformation], then runs [has_hardened_runtime] and
//! [entitlements_are_safe] over it.
//!
//! Failure to resolve or validate an identity means the identity is unknown or
//! could not be validated. It is not proof that code is unsigned.
//!
//! The policy checks in [evaluator] never fail. Missing or malformed signing
//! information yields a boolean like any other input: no hardened runtime, and
//! no dangerous entitlements.

mod error;
pub use error::*;
pub mod evaluator;
pub use evaluator::*;
mod flags;
pub use flags::*;
#[cfg(target_os = "macos")]
#[allow(non_upper_case_globals)]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::*;
mod oracle;
pub use oracle::*;
pub mod requirement;
pub use requirement::*;
mod resolver;
pub use resolver::*;
pub mod signing_information;
pub use signing_information::*;
