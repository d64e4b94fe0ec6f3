// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Templated code requirement expressions.
//!
//! These produce requirement language strings only. Compiling them is the job
//! of code signing services (see [crate::CodeIdentityResolver::compile_requirement]).
//!
//! Values are interpolated between double quotes verbatim. Embedded `"`
//! characters are *not* escaped, so a bundle identifier or common name
//! containing one will produce a corrupt expression.

use crate::error::CodeIdentityError;

/// Code must chain to Apple's root certificate authority.
pub const REQUIREMENT_APPLE: &str = "anchor apple";

/// Code must be signed by any Apple-issued certificate, including developer certificates.
pub const REQUIREMENT_DEVELOPER: &str = "anchor apple generic";

/// Code must be signed by the Mac App Store.
pub const REQUIREMENT_APP_STORE: &str = "anchor apple generic and certificate leaf [subject.CN] = \"Apple Mac OS Application Signing\"";

/// Build a requirement pinning code to a bundle identifier and signing certificate.
///
/// The result chains to Apple (see [REQUIREMENT_DEVELOPER]), has identifier
/// `bundle_id`, and is signed by a leaf certificate whose subject common name
/// is `subject_cn`.
pub fn build_requirement(bundle_id: &str, subject_cn: &str) -> String {
    format!(
        "{} and identifier \"{}\" and certificate leaf[subject.CN] = \"{}\"",
        REQUIREMENT_DEVELOPER, bundle_id, subject_cn
    )
}

/// Well-known requirement expressions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequirementPreset {
    Apple,
    Developer,
    AppStore,
}

impl RequirementPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apple => REQUIREMENT_APPLE,
            Self::Developer => REQUIREMENT_DEVELOPER,
            Self::AppStore => REQUIREMENT_APP_STORE,
        }
    }
}

impl TryFrom<&str> for RequirementPreset {
    type Error = CodeIdentityError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "apple" => Ok(Self::Apple),
            "developer" => Ok(Self::Developer),
            "app-store" => Ok(Self::AppStore),
            _ => Err(CodeIdentityError::CliGeneralError(format!(
                "{} is not a known requirement; use apple, developer, or app-store",
                s
            ))),
        }
    }
}
