// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the platform's code signing services.
//!
//! Signature verification, certificate chain evaluation, and the requirement
//! language compiler all live inside the operating system. This module defines
//! the narrow set of calls we make into that machinery as the
//! [CodeSigningOracle] trait. On macOS, [crate::SecurityFrameworkOracle]
//! implements it on top of `Security.framework`.

use {
    crate::{
        error::CodeIdentityError,
        flags::{InformationFlags, ValidityFlags},
        signing_information::SigningInformation,
    },
    std::{
        fmt::{Debug, Formatter},
        path::{Path, PathBuf},
    },
};

/// Status code returned by code signing services.
pub type OSStatus = i32;

/// Process identifier.
pub type Pid = i32;

pub const ERR_SEC_SUCCESS: OSStatus = 0;
/// The code does not satisfy the requirement it was checked against.
pub const ERR_SEC_CS_REQ_FAILED: OSStatus = -67050;
/// The requirement string could not be compiled.
pub const ERR_SEC_CS_REQ_INVALID: OSStatus = -67052;
pub const ERR_SEC_CS_SIGNATURE_FAILED: OSStatus = -67061;
/// The code has no signature.
pub const ERR_SEC_CS_UNSIGNED: OSStatus = -67062;
/// No code (e.g. no process) matches the given attributes.
pub const ERR_SEC_CS_NO_SUCH_CODE: OSStatus = -67065;
/// The on-disk code backing a running process can no longer be found.
pub const ERR_SEC_CS_STATIC_CODE_NOT_FOUND: OSStatus = -67068;
/// An object of the wrong kind was passed.
pub const ERR_SEC_CS_INVALID_OBJECT_REF: OSStatus = -67071;

/// An opaque audit token identifying a process.
///
/// Unlike a pid, an audit token is not subject to reuse after the process exits.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct AuditToken([u32; 8]);

impl AuditToken {
    /// Construct an instance from the eight words of an `audit_token_t`.
    pub fn from_words(words: [u32; 8]) -> Self {
        Self(words)
    }

    /// Construct an instance from the 32 bytes of an `audit_token_t`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodeIdentityError> {
        if data.len() != 32 {
            return Err(CodeIdentityError::AuditTokenLength(data.len()));
        }

        let mut words = [0u32; 8];
        for (word, chunk) in words.iter_mut().zip(data.chunks_exact(4)) {
            *word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        Ok(Self(words))
    }

    pub fn words(&self) -> &[u32; 8] {
        &self.0
    }

    /// The raw bytes of the token, as code signing services expects them.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut data = [0u8; 32];
        for (chunk, word) in data.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }

        data
    }
}

impl Debug for AuditToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuditToken").field(&self.0).finish()
    }
}

/// Attributes locating a guest within its host.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GuestAttributes {
    pub pid: Option<Pid>,
    pub audit_token: Option<AuditToken>,
    pub canonical_path: Option<PathBuf>,
}

impl GuestAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    #[must_use]
    pub fn audit_token(mut self, token: AuditToken) -> Self {
        self.audit_token = Some(token);
        self
    }

    #[must_use]
    pub fn canonical_path(mut self, path: impl AsRef<Path>) -> Self {
        self.canonical_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pid.is_none() && self.audit_token.is_none() && self.canonical_path.is_none()
    }
}

/// The calls we make into platform code signing services.
///
/// Handles produced by an implementation are owned by the caller and released
/// when dropped. Every method is a synchronous request/response; implementations
/// must not retry on failure and must surface platform status codes verbatim
/// via [CodeIdentityError::Oracle].
pub trait CodeSigningOracle {
    /// Handle to running code.
    type Code;
    /// Handle to on-disk code.
    type StaticCode;
    /// A compiled code requirement.
    type Requirement;

    /// Obtain a handle to the code of the calling process.
    fn copy_self(&self) -> Result<Self::Code, CodeIdentityError>;

    /// Locate a guest of `host` (or of the system if `None`) by attributes.
    fn copy_guest(
        &self,
        host: Option<&Self::Code>,
        attributes: &GuestAttributes,
    ) -> Result<Self::Code, CodeIdentityError>;

    /// Obtain a handle to on-disk code at a filesystem path.
    fn static_code_from_path(&self, path: &Path) -> Result<Self::StaticCode, CodeIdentityError>;

    /// Obtain the on-disk code that running code was loaded from.
    fn copy_static_code(&self, code: &Self::Code) -> Result<Self::StaticCode, CodeIdentityError>;

    /// Obtain the filesystem path of on-disk code.
    fn copy_path(&self, code: &Self::StaticCode) -> Result<PathBuf, CodeIdentityError>;

    /// Check the validity of running code.
    fn check_validity(
        &self,
        code: &Self::Code,
        flags: ValidityFlags,
        requirement: Option<&Self::Requirement>,
    ) -> Result<(), CodeIdentityError>;

    /// Check the validity of on-disk code.
    fn check_static_validity(
        &self,
        code: &Self::StaticCode,
        flags: ValidityFlags,
        requirement: Option<&Self::Requirement>,
    ) -> Result<(), CodeIdentityError>;

    /// Compile a code requirement expression.
    fn create_requirement(&self, text: &str) -> Result<Self::Requirement, CodeIdentityError>;

    /// Retrieve signing information for on-disk code.
    fn copy_signing_information(
        &self,
        code: &Self::StaticCode,
        flags: InformationFlags,
    ) -> Result<SigningInformation, CodeIdentityError>;
}

/// A code identity: either running code or the on-disk code it came from.
///
/// A dynamic identity maps to exactly one static identity. The reverse is not
/// true: on-disk code may have zero or many running instances.
pub enum CodeIdentity<O: CodeSigningOracle + ?Sized> {
    Dynamic(O::Code),
    Static(O::StaticCode),
}

impl<O: CodeSigningOracle + ?Sized> CodeIdentity<O> {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    pub fn as_dynamic(&self) -> Option<&O::Code> {
        match self {
            Self::Dynamic(code) => Some(code),
            Self::Static(_) => None,
        }
    }

    pub fn as_static(&self) -> Option<&O::StaticCode> {
        match self {
            Self::Dynamic(_) => None,
            Self::Static(code) => Some(code),
        }
    }
}

impl<O: CodeSigningOracle + ?Sized> Debug for CodeIdentity<O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dynamic(_) => f.write_str("CodeIdentity::Dynamic(..)"),
            Self::Static(_) => f.write_str("CodeIdentity::Static(..)"),
        }
    }
}

/// Outcome of validating a code identity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationOutcome {
    Valid,
    /// Validation failed with the given platform status.
    Invalid(OSStatus),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Convert into a [Result], mapping [Self::Invalid] to [CodeIdentityError::Oracle].
    pub fn into_result(self) -> Result<(), CodeIdentityError> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(status) => Err(CodeIdentityError::Oracle(status)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory oracle describing a fixed set of processes and files.

    use {
        super::*,
        crate::signing_information::{SigningInformation, SigningValue},
        std::collections::BTreeMap,
    };

    #[derive(Clone, Debug)]
    pub struct MockCode {
        pub pid: Pid,
        pub static_code: Option<MockStaticCode>,
    }

    #[derive(Clone, Debug)]
    pub struct MockStaticCode {
        pub path: PathBuf,
        pub anchor_apple: bool,
        pub info: SigningInformation,
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct MockRequirement(pub String);

    /// Requirement strings are "compiled" by accepting known clauses verbatim.
    #[derive(Default)]
    pub struct MockOracle {
        pub self_pid: Pid,
        pub processes: BTreeMap<Pid, MockCode>,
        pub files: BTreeMap<PathBuf, MockStaticCode>,
        pub tokens: BTreeMap<[u32; 8], Pid>,
    }

    impl MockOracle {
        /// A system with pid 1 running an Apple-signed binary and pid 500 (us)
        /// running an unsigned test binary.
        pub fn typical() -> Self {
            let system = MockStaticCode {
                path: PathBuf::from("/sbin/launchd"),
                anchor_apple: true,
                info: SigningInformation::from_iter([
                    ("identifier".to_string(), "com.apple.xpc.launchd".into()),
                    ("flags".to_string(), SigningValue::Integer(0x10000)),
                ]),
            };
            let test_binary = MockStaticCode {
                path: PathBuf::from("/tmp/target/debug/deps/test-binary"),
                anchor_apple: false,
                info: SigningInformation::from_iter([
                    ("identifier".to_string(), "test-binary".into()),
                    ("flags".to_string(), SigningValue::Integer(0x20002)),
                    (
                        "entitlements-dict".to_string(),
                        SigningValue::Mapping(BTreeMap::from([(
                            "com.apple.security.get-task-allow".to_string(),
                            SigningValue::Integer(1),
                        )])),
                    ),
                ]),
            };

            let mut oracle = Self {
                self_pid: 500,
                ..Default::default()
            };
            oracle.processes.insert(
                1,
                MockCode {
                    pid: 1,
                    static_code: Some(system.clone()),
                },
            );
            oracle.processes.insert(
                500,
                MockCode {
                    pid: 500,
                    static_code: Some(test_binary.clone()),
                },
            );
            // A process whose binary was deleted after launch.
            oracle.processes.insert(
                600,
                MockCode {
                    pid: 600,
                    static_code: None,
                },
            );
            oracle.tokens.insert([1, 0, 0, 0, 0, 500, 0, 0], 500);
            oracle.files.insert(system.path.clone(), system);
            oracle
                .files
                .insert(test_binary.path.clone(), test_binary);

            oracle
        }

        fn evaluate(
            &self,
            code: &MockStaticCode,
            requirement: Option<&MockRequirement>,
        ) -> Result<(), CodeIdentityError> {
            match requirement {
                None => Ok(()),
                Some(req) if req.0.starts_with("anchor apple") && code.anchor_apple => Ok(()),
                Some(_) => Err(CodeIdentityError::Oracle(ERR_SEC_CS_REQ_FAILED)),
            }
        }
    }

    impl CodeSigningOracle for MockOracle {
        type Code = MockCode;
        type StaticCode = MockStaticCode;
        type Requirement = MockRequirement;

        fn copy_self(&self) -> Result<Self::Code, CodeIdentityError> {
            self.processes
                .get(&self.self_pid)
                .cloned()
                .ok_or(CodeIdentityError::Oracle(ERR_SEC_CS_NO_SUCH_CODE))
        }

        fn copy_guest(
            &self,
            host: Option<&Self::Code>,
            attributes: &GuestAttributes,
        ) -> Result<Self::Code, CodeIdentityError> {
            if host.is_some() {
                return Err(CodeIdentityError::Oracle(ERR_SEC_CS_NO_SUCH_CODE));
            }

            let pid = if let Some(token) = &attributes.audit_token {
                self.tokens.get(token.words()).copied()
            } else {
                attributes.pid
            };

            pid.and_then(|pid| self.processes.get(&pid).cloned())
                .ok_or(CodeIdentityError::Oracle(ERR_SEC_CS_NO_SUCH_CODE))
        }

        fn static_code_from_path(
            &self,
            path: &Path,
        ) -> Result<Self::StaticCode, CodeIdentityError> {
            self.files
                .get(path)
                .cloned()
                .ok_or(CodeIdentityError::Oracle(ERR_SEC_CS_STATIC_CODE_NOT_FOUND))
        }

        fn copy_static_code(&self, code: &Self::Code) -> Result<Self::StaticCode, CodeIdentityError> {
            code.static_code
                .clone()
                .ok_or(CodeIdentityError::Oracle(ERR_SEC_CS_STATIC_CODE_NOT_FOUND))
        }

        fn copy_path(&self, code: &Self::StaticCode) -> Result<PathBuf, CodeIdentityError> {
            Ok(code.path.clone())
        }

        fn check_validity(
            &self,
            code: &Self::Code,
            _flags: ValidityFlags,
            requirement: Option<&Self::Requirement>,
        ) -> Result<(), CodeIdentityError> {
            let static_code = self.copy_static_code(code)?;
            self.evaluate(&static_code, requirement)
        }

        fn check_static_validity(
            &self,
            code: &Self::StaticCode,
            flags: ValidityFlags,
            requirement: Option<&Self::Requirement>,
        ) -> Result<(), CodeIdentityError> {
            // Files registered under a relative path stand in for code whose
            // location can't be expressed as a URL.
            if code.path.is_relative() {
                return Err(CodeIdentityError::PathConversion(code.path.clone()));
            }

            // Mirror the platform rejecting flags it can't honor.
            if flags.contains(ValidityFlags::ALLOW_NETWORK_ACCESS | ValidityFlags::NO_NETWORK_ACCESS) {
                return Err(CodeIdentityError::Oracle(-67070));
            }

            self.evaluate(code, requirement)
        }

        fn create_requirement(&self, text: &str) -> Result<Self::Requirement, CodeIdentityError> {
            if text.starts_with("anchor ") && text.matches('"').count() % 2 == 0 {
                Ok(MockRequirement(text.to_string()))
            } else {
                Err(CodeIdentityError::Oracle(ERR_SEC_CS_REQ_INVALID))
            }
        }

        fn copy_signing_information(
            &self,
            code: &Self::StaticCode,
            _flags: InformationFlags,
        ) -> Result<SigningInformation, CodeIdentityError> {
            Ok(code.info.clone())
        }
    }
}
