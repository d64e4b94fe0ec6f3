// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {crate::oracle::OSStatus, std::path::PathBuf, thiserror::Error};

/// Unified error type for code identity operations.
#[derive(Debug, Error)]
pub enum CodeIdentityError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument")]
    CliBadArgument,

    #[error("{0}")]
    CliGeneralError(String),

    /// A code signing services call failed with the given status.
    ///
    /// The status is passed through verbatim. It means the identity could not
    /// be resolved or validated, which is not the same thing as being unsigned.
    #[error("code signing services error {}: {}", .0, status_message(.0))]
    Oracle(OSStatus),

    #[error("unable to express path as a file URL: {}", .0.display())]
    PathConversion(PathBuf),

    #[error("audit token must be 32 bytes; got {0}")]
    AuditTokenLength(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error parsing plist: {0}")]
    PlistParse(plist::Error),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl CodeIdentityError {
    /// The raw platform status code, if this error came from code signing services.
    pub fn status(&self) -> Option<OSStatus> {
        match self {
            Self::Oracle(status) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(target_os = "macos")]
impl From<security_framework::base::Error> for CodeIdentityError {
    fn from(e: security_framework::base::Error) -> Self {
        Self::Oracle(e.code())
    }
}

/// Obtain a human readable description of a code signing status code.
#[cfg(target_os = "macos")]
pub fn describe_status(status: OSStatus) -> String {
    security_framework::base::Error::from_code(status)
        .message()
        .unwrap_or_else(|| well_known_status_name(status).to_string())
}

/// Obtain a human readable description of a code signing status code.
#[cfg(not(target_os = "macos"))]
pub fn describe_status(status: OSStatus) -> String {
    well_known_status_name(status).to_string()
}

fn status_message(status: &OSStatus) -> String {
    describe_status(*status)
}

fn well_known_status_name(status: OSStatus) -> &'static str {
    match status {
        -67050 => "errSecCSReqFailed",
        -67052 => "errSecCSReqInvalid",
        -67054 => "errSecCSBadResource",
        -67056 => "errSecCSResourcesNotFound",
        -67061 => "errSecCSSignatureFailed",
        -67062 => "errSecCSUnsigned",
        -67063 => "errSecCSGuestInvalid",
        -67065 => "errSecCSNoSuchCode",
        -67068 => "errSecCSStaticCodeNotFound",
        -67071 => "errSecCSInvalidObjectRef",
        -67072 => "errSecCSUnimplemented",
        _ => "unrecognized status",
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::oracle::ERR_SEC_CS_NO_SUCH_CODE};

    #[test]
    fn oracle_status_passthrough() {
        let err = CodeIdentityError::Oracle(ERR_SEC_CS_NO_SUCH_CODE);
        assert_eq!(err.status(), Some(-67065));
        assert!(format!("{}", err).starts_with("code signing services error -67065"));

        assert_eq!(CodeIdentityError::CliBadArgument.status(), None);
        assert_eq!(
            CodeIdentityError::PathConversion(PathBuf::from("relative")).status(),
            None
        );
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn describe_known_status() {
        assert_eq!(describe_status(-67062), "errSecCSUnsigned");
        assert_eq!(describe_status(1), "unrecognized status");
    }
}
