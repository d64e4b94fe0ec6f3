// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flags exchanged with code signing services.
//!
//! Apple's `SecCSFlags` is a single 32-bit type whose bits mean different
//! things depending on which API receives them. We model the two contexts we
//! care about as distinct types so a validity flag can't be passed where an
//! information flag is expected.
//!
//! [CodeSignatureFlags] is different: it describes the flags *embedded in a
//! signature*, as reported under the `flags` key of signing information.

use {crate::error::CodeIdentityError, std::str::FromStr};

bitflags::bitflags! {
    /// Flags controlling a validity check of code.
    pub struct ValidityFlags: u32 {
        /// Validate every architecture slice of a universal binary.
        const CHECK_ALL_ARCHITECTURES = 1 << 0;
        /// Do not validate the contents of the main executable.
        const DO_NOT_VALIDATE_EXECUTABLE = 1 << 1;
        /// Do not validate sealed resources.
        const DO_NOT_VALIDATE_RESOURCES = 1 << 2;
        /// Only validate the signature itself, not the signed content.
        const BASIC_VALIDATE_ONLY = Self::DO_NOT_VALIDATE_EXECUTABLE.bits | Self::DO_NOT_VALIDATE_RESOURCES.bits;
        /// Recursively validate nested code (frameworks, plugins, helpers).
        const CHECK_NESTED_CODE = 1 << 3;
        /// Apply additional, stricter validation rules.
        const STRICT_VALIDATE = 1 << 4;
        /// Report every problem rather than stopping at the first.
        const FULL_REPORT = 1 << 5;
        /// Apply the architecture rules Gatekeeper uses.
        const CHECK_GATEKEEPER_ARCHITECTURES = (1 << 6) | Self::CHECK_ALL_ARCHITECTURES.bits;
        /// Reject symlinks that point outside the bundle.
        const RESTRICT_SYMLINKS = 1 << 7;
        /// Require a standard application bundle layout.
        const RESTRICT_TO_APP_LIKE = 1 << 8;
        /// Reject sideband data such as extended attributes.
        const RESTRICT_SIDEBAND_DATA = 1 << 9;
        /// Permit network access during validation.
        const ALLOW_NETWORK_ACCESS = 1 << 16;
        /// Forbid network access during validation.
        const NO_NETWORK_ACCESS = 1 << 29;
        /// Treat certificate expiration as a failure.
        const CONSIDER_EXPIRATION = 1 << 31;
        /// Require successful revocation checks.
        const ENFORCE_REVOCATION_CHECKS = 1 << 30;
        /// Check anchors against the trust settings of the system.
        const CHECK_TRUSTED_ANCHORS = 1 << 27;
        /// Perform a quick check, trusting cached results.
        const QUICK_CHECK = 1 << 26;
    }
}

impl ValidityFlags {
    /// Default flags when validating static (on-disk) code.
    ///
    /// Every architecture and all nested code is checked, but sealed resources are
    /// *not* validated. Resource tampering is therefore not detected under these
    /// defaults.
    pub fn default_static() -> Self {
        Self::CHECK_ALL_ARCHITECTURES | Self::CHECK_NESTED_CODE | Self::DO_NOT_VALIDATE_RESOURCES
    }

    /// Default flags when validating dynamic (running) code.
    pub fn default_dynamic() -> Self {
        Self::empty()
    }

    /// Attempt to convert a series of strings into [ValidityFlags].
    pub fn from_strs(s: &[&str]) -> Result<Self, CodeIdentityError> {
        let mut flags = Self::empty();

        for s in s {
            flags |= Self::from_str(s)?;
        }

        Ok(flags)
    }
}

impl FromStr for ValidityFlags {
    type Err = CodeIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-architectures" => Ok(Self::CHECK_ALL_ARCHITECTURES),
            "no-executable" => Ok(Self::DO_NOT_VALIDATE_EXECUTABLE),
            "no-resources" => Ok(Self::DO_NOT_VALIDATE_RESOURCES),
            "basic" => Ok(Self::BASIC_VALIDATE_ONLY),
            "nested" => Ok(Self::CHECK_NESTED_CODE),
            "strict" => Ok(Self::STRICT_VALIDATE),
            "full-report" => Ok(Self::FULL_REPORT),
            "gatekeeper-architectures" => Ok(Self::CHECK_GATEKEEPER_ARCHITECTURES),
            "restrict-symlinks" => Ok(Self::RESTRICT_SYMLINKS),
            "restrict-to-app-like" => Ok(Self::RESTRICT_TO_APP_LIKE),
            "restrict-sideband-data" => Ok(Self::RESTRICT_SIDEBAND_DATA),
            "allow-network" => Ok(Self::ALLOW_NETWORK_ACCESS),
            "no-network" => Ok(Self::NO_NETWORK_ACCESS),
            "consider-expiration" => Ok(Self::CONSIDER_EXPIRATION),
            "enforce-revocation" => Ok(Self::ENFORCE_REVOCATION_CHECKS),
            "trusted-anchors" => Ok(Self::CHECK_TRUSTED_ANCHORS),
            "quick" => Ok(Self::QUICK_CHECK),
            _ => Err(CodeIdentityError::CliGeneralError(format!(
                "unknown validity flag: {}",
                s
            ))),
        }
    }
}

bitflags::bitflags! {
    /// Flags selecting which signing information to retrieve.
    pub struct InformationFlags: u32 {
        const INTERNAL_INFORMATION = 1 << 0;
        /// Certificates, CMS blob, timestamps, and entitlements.
        const SIGNING_INFORMATION = 1 << 1;
        /// Designated and internal requirements.
        const REQUIREMENT_INFORMATION = 1 << 2;
        /// Run-time status of the code. Only meaningful for dynamic code.
        const DYNAMIC_INFORMATION = 1 << 3;
        const CONTENT_INFORMATION = 1 << 4;
        const SKIP_RESOURCE_DIRECTORY = 1 << 5;
        const CALCULATE_CMS_DIGEST = 1 << 6;
    }
}

impl InformationFlags {
    /// Default flags when retrieving signing information for static code.
    pub fn default_static() -> Self {
        Self::SIGNING_INFORMATION
    }

    /// Default flags when retrieving signing information for dynamic code.
    pub fn default_dynamic() -> Self {
        Self::DYNAMIC_INFORMATION
    }

    /// Flags retrieving everything the policy checks look at.
    ///
    /// The entitlements dictionary is only reported as part of the requirement
    /// information, so neither default is sufficient to assess code.
    pub fn assessment() -> Self {
        Self::SIGNING_INFORMATION | Self::REQUIREMENT_INFORMATION
    }
}

impl FromStr for InformationFlags {
    type Err = CodeIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::INTERNAL_INFORMATION),
            "signing" => Ok(Self::SIGNING_INFORMATION),
            "requirement" => Ok(Self::REQUIREMENT_INFORMATION),
            "dynamic" => Ok(Self::DYNAMIC_INFORMATION),
            "content" => Ok(Self::CONTENT_INFORMATION),
            "skip-resource-directory" => Ok(Self::SKIP_RESOURCE_DIRECTORY),
            "cms-digest" => Ok(Self::CALCULATE_CMS_DIGEST),
            _ => Err(CodeIdentityError::CliGeneralError(format!(
                "unknown information flag: {}",
                s
            ))),
        }
    }
}

bitflags::bitflags! {
    /// Code signature flags.
    ///
    /// These flags are embedded in the Code Directory and govern use of the embedded
    /// signature.
    pub struct CodeSignatureFlags: u32 {
        /// Code may act as a host that controls and supervises guest code.
        const HOST = 0x0001;
        /// The code has been sealed without a signing identity.
        const ADHOC = 0x0002;
        /// Set the "hard" status bit for the code when it starts running.
        const FORCE_HARD = 0x0100;
        /// Implicitly set the "kill" status bit for the code when it starts running.
        const FORCE_KILL = 0x0200;
        /// Force certificate expiration checks.
        const FORCE_EXPIRATION = 0x0400;
        /// Restrict dyld loading.
        const RESTRICT = 0x0800;
        /// Enforce code signing.
        const ENFORCEMENT = 0x1000;
        /// Library validation required.
        const LIBRARY_VALIDATION = 0x2000;
        /// Apply runtime hardening policies.
        const RUNTIME = 0x10000;
        /// The code was automatically signed by the linker.
        const LINKER_SIGNED = 0x20000;
    }
}

impl FromStr for CodeSignatureFlags {
    type Err = CodeIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::HOST),
            "adhoc" => Ok(Self::ADHOC),
            "hard" => Ok(Self::FORCE_HARD),
            "kill" => Ok(Self::FORCE_KILL),
            "expires" => Ok(Self::FORCE_EXPIRATION),
            "restrict" => Ok(Self::RESTRICT),
            "enforcement" => Ok(Self::ENFORCEMENT),
            "library" => Ok(Self::LIBRARY_VALIDATION),
            "runtime" => Ok(Self::RUNTIME),
            "linker-signed" => Ok(Self::LINKER_SIGNED),
            _ => Err(CodeIdentityError::CliGeneralError(format!(
                "unknown code signature flag: {}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_defaults_skip_resources() {
        let flags = ValidityFlags::default_static();

        assert!(flags.contains(ValidityFlags::CHECK_ALL_ARCHITECTURES));
        assert!(flags.contains(ValidityFlags::CHECK_NESTED_CODE));
        assert!(flags.contains(ValidityFlags::DO_NOT_VALIDATE_RESOURCES));
        assert!(!flags.contains(ValidityFlags::DO_NOT_VALIDATE_EXECUTABLE));
        assert_eq!(flags.bits(), 0b1101);
    }

    #[test]
    fn dynamic_defaults() {
        assert!(ValidityFlags::default_dynamic().is_empty());
        assert_eq!(InformationFlags::default_dynamic().bits(), 8);
        assert_eq!(InformationFlags::default_static().bits(), 2);
    }

    #[test]
    fn assessment_requests_entitlements() {
        let entitlements = InformationFlags::REQUIREMENT_INFORMATION;

        assert!(InformationFlags::assessment().contains(entitlements));
        assert!(InformationFlags::assessment().contains(InformationFlags::default_static()));
        assert!(!InformationFlags::default_static().contains(entitlements));
        assert!(!InformationFlags::default_dynamic().contains(entitlements));
        assert_eq!(InformationFlags::assessment().bits(), 6);
    }

    #[test]
    fn composite_validity_flags() {
        assert_eq!(ValidityFlags::BASIC_VALIDATE_ONLY.bits(), 0b110);
        assert!(ValidityFlags::CHECK_GATEKEEPER_ARCHITECTURES
            .contains(ValidityFlags::CHECK_ALL_ARCHITECTURES));
    }

    #[test]
    fn validity_flags_from_strs() {
        assert_eq!(
            ValidityFlags::from_strs(&["nested", "strict"]).unwrap(),
            ValidityFlags::CHECK_NESTED_CODE | ValidityFlags::STRICT_VALIDATE
        );
        assert!(ValidityFlags::from_str("bogus").is_err());
    }

    #[test]
    fn code_signature_flags_from_str() {
        assert_eq!(
            CodeSignatureFlags::from_str("runtime").unwrap(),
            CodeSignatureFlags::RUNTIME
        );
        assert_eq!(CodeSignatureFlags::RUNTIME.bits(), 0x10000);
        assert_eq!(
            CodeSignatureFlags::from_str("library").unwrap(),
            CodeSignatureFlags::LIBRARY_VALIDATION
        );
        assert!(CodeSignatureFlags::from_str("unknown").is_err());
    }

    #[test]
    fn information_flags_from_str() {
        assert_eq!(
            InformationFlags::from_str("signing").unwrap(),
            InformationFlags::SIGNING_INFORMATION
        );
        assert!(InformationFlags::from_str("everything").is_err());
    }
}
