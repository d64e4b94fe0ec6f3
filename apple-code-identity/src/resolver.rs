// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolving and validating code identities.

use {
    crate::{
        error::CodeIdentityError,
        flags::{InformationFlags, ValidityFlags},
        oracle::{
            AuditToken, CodeIdentity, CodeSigningOracle, GuestAttributes, Pid, ValidationOutcome,
            ERR_SEC_CS_INVALID_OBJECT_REF,
        },
        signing_information::SigningInformation,
    },
    log::debug,
    std::path::{Path, PathBuf},
};

/// Resolves code identities and queries them through a [CodeSigningOracle].
///
/// Every method is a synchronous request against the oracle. Nothing is
/// cached and nothing is retried: the first oracle error is returned as-is.
pub struct CodeIdentityResolver<O: CodeSigningOracle> {
    oracle: O,
}

#[cfg(target_os = "macos")]
impl CodeIdentityResolver<crate::macos::SecurityFrameworkOracle> {
    /// Construct an instance bound to the system's code signing services.
    pub fn system() -> Self {
        Self::new(crate::macos::SecurityFrameworkOracle::default())
    }
}

impl<O: CodeSigningOracle> CodeIdentityResolver<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Resolve the dynamic identity of a running process.
    pub fn resolve_by_pid(&self, pid: Pid) -> Result<CodeIdentity<O>, CodeIdentityError> {
        debug!("resolving code for pid {}", pid);
        self.resolve_guest(None, &GuestAttributes::new().pid(pid))
    }

    /// Resolve the dynamic identity of a running process by audit token.
    ///
    /// Prefer this over [Self::resolve_by_pid] when the pid may have been reused.
    pub fn resolve_by_audit_token(
        &self,
        token: &AuditToken,
    ) -> Result<CodeIdentity<O>, CodeIdentityError> {
        debug!("resolving code for audit token {:?}", token);
        self.resolve_guest(None, &GuestAttributes::new().audit_token(*token))
    }

    /// Resolve the static identity of on-disk code.
    pub fn resolve_by_path(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<CodeIdentity<O>, CodeIdentityError> {
        let path = path.as_ref();
        debug!("resolving static code at {}", path.display());

        Ok(CodeIdentity::Static(self.oracle.static_code_from_path(path)?))
    }

    /// Resolve the dynamic identity of the calling process.
    pub fn resolve_self(&self) -> Result<CodeIdentity<O>, CodeIdentityError> {
        debug!("resolving code for self");
        Ok(CodeIdentity::Dynamic(self.oracle.copy_self()?))
    }

    /// Resolve the dynamic identity of the parent of the calling process.
    #[cfg(unix)]
    pub fn resolve_parent(&self) -> Result<CodeIdentity<O>, CodeIdentityError> {
        self.resolve_by_pid(std::os::unix::process::parent_id() as Pid)
    }

    /// Resolve a guest of `host` by attributes.
    ///
    /// `host` of `None` means the system itself, which is how processes are
    /// located. A static `host` is rejected since only running code hosts guests.
    pub fn resolve_guest(
        &self,
        host: Option<&CodeIdentity<O>>,
        attributes: &GuestAttributes,
    ) -> Result<CodeIdentity<O>, CodeIdentityError> {
        let host = match host {
            Some(CodeIdentity::Dynamic(code)) => Some(code),
            Some(CodeIdentity::Static(_)) => {
                return Err(CodeIdentityError::Oracle(ERR_SEC_CS_INVALID_OBJECT_REF))
            }
            None => None,
        };

        Ok(CodeIdentity::Dynamic(
            self.oracle.copy_guest(host, attributes)?,
        ))
    }

    /// Obtain the static identity backing a dynamic identity.
    ///
    /// Fails if `identity` is already static or if its on-disk code can't be
    /// located (e.g. the binary was deleted after launch).
    pub fn to_static(&self, identity: &CodeIdentity<O>) -> Result<CodeIdentity<O>, CodeIdentityError> {
        match identity {
            CodeIdentity::Dynamic(code) => {
                Ok(CodeIdentity::Static(self.oracle.copy_static_code(code)?))
            }
            CodeIdentity::Static(_) => Err(CodeIdentityError::Oracle(ERR_SEC_CS_INVALID_OBJECT_REF)),
        }
    }

    /// Obtain the filesystem path of an identity's on-disk code.
    pub fn path_of(&self, identity: &CodeIdentity<O>) -> Result<PathBuf, CodeIdentityError> {
        match identity {
            CodeIdentity::Static(code) => self.oracle.copy_path(code),
            CodeIdentity::Dynamic(code) => {
                let static_code = self.oracle.copy_static_code(code)?;
                self.oracle.copy_path(&static_code)
            }
        }
    }

    /// Compile a code requirement expression.
    ///
    /// Syntax errors are reported by the oracle; the string is not inspected here.
    pub fn compile_requirement(&self, text: &str) -> Result<O::Requirement, CodeIdentityError> {
        debug!("compiling requirement: {}", text);
        self.oracle.create_requirement(text)
    }

    /// Validate an identity, optionally against a requirement.
    ///
    /// Without a requirement, only the internal consistency of the signature is
    /// checked. `flags` of `None` selects [ValidityFlags::default_static] or
    /// [ValidityFlags::default_dynamic] depending on the identity.
    ///
    /// An [ValidationOutcome::Invalid] outcome means the identity could not be
    /// validated. It does not by itself mean the code is unsigned. Errors that
    /// did not come from code signing services are returned as errors.
    pub fn validate(
        &self,
        identity: &CodeIdentity<O>,
        requirement: Option<&O::Requirement>,
        flags: Option<ValidityFlags>,
    ) -> Result<ValidationOutcome, CodeIdentityError> {
        let res = match identity {
            CodeIdentity::Dynamic(code) => self.oracle.check_validity(
                code,
                flags.unwrap_or_else(ValidityFlags::default_dynamic),
                requirement,
            ),
            CodeIdentity::Static(code) => self.oracle.check_static_validity(
                code,
                flags.unwrap_or_else(ValidityFlags::default_static),
                requirement,
            ),
        };

        match res {
            Ok(()) => Ok(ValidationOutcome::Valid),
            Err(CodeIdentityError::Oracle(status)) => {
                debug!("validation failed with status {}", status);
                Ok(ValidationOutcome::Invalid(status))
            }
            Err(e) => Err(e),
        }
    }

    /// Compile `requirement` and validate an identity against it.
    ///
    /// Compilation failure is returned as an error; validation failure as
    /// [ValidationOutcome::Invalid].
    pub fn validate_against(
        &self,
        identity: &CodeIdentity<O>,
        requirement: &str,
        flags: Option<ValidityFlags>,
    ) -> Result<ValidationOutcome, CodeIdentityError> {
        let requirement = self.compile_requirement(requirement)?;

        self.validate(identity, Some(&requirement), flags)
    }

    /// Retrieve signing information for an identity.
    ///
    /// Dynamic identities are first mapped to their static code. `flags` of
    /// `None` selects [InformationFlags::default_static] or
    /// [InformationFlags::default_dynamic] depending on the identity.
    pub fn signing_information(
        &self,
        identity: &CodeIdentity<O>,
        flags: Option<InformationFlags>,
    ) -> Result<SigningInformation, CodeIdentityError> {
        match identity {
            CodeIdentity::Static(code) => self.oracle.copy_signing_information(
                code,
                flags.unwrap_or_else(InformationFlags::default_static),
            ),
            CodeIdentity::Dynamic(code) => {
                let static_code = self.oracle.copy_static_code(code)?;
                self.oracle.copy_signing_information(
                    &static_code,
                    flags.unwrap_or_else(InformationFlags::default_dynamic),
                )
            }
        }
    }
}
