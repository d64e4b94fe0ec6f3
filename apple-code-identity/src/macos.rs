// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Functionality that only works on macOS.
//!
//! [SecurityFrameworkOracle] speaks to the Code Signing Services of
//! `Security.framework`.

use {
    crate::{
        error::CodeIdentityError,
        flags::{InformationFlags, ValidityFlags},
        oracle::{CodeSigningOracle, GuestAttributes, OSStatus, ERR_SEC_SUCCESS},
        signing_information::{SigningInformation, SigningValue},
    },
    core_foundation::{
        array::CFArray,
        base::{CFType, TCFType},
        boolean::CFBoolean,
        data::CFData,
        dictionary::CFDictionary,
        number::CFNumber,
        string::CFString,
        url::CFURL,
    },
    core_foundation_sys::{base::CFTypeRef, dictionary::CFDictionaryRef},
    log::debug,
    security_framework::os::macos::code_signing::{
        Flags, GuestAttributes as SecGuestAttributes, SecCode, SecRequirement, SecStaticCode,
    },
    security_framework_sys::code_signing::{
        kSecGuestAttributeCanonical, SecCSFlags, SecCodeCheckValidity, SecCodeRef,
        SecStaticCodeCheckValidity, SecStaticCodeRef,
    },
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
        ptr,
        str::FromStr,
    },
};

// Not declared by security-framework-sys.
#[link(name = "Security", kind = "framework")]
extern "C" {
    fn SecCodeCopyStaticCode(
        code: SecCodeRef,
        flags: SecCSFlags,
        static_code: *mut SecStaticCodeRef,
    ) -> OSStatus;
    fn SecCodeCopySigningInformation(
        code: SecStaticCodeRef,
        flags: SecCSFlags,
        information: *mut CFDictionaryRef,
    ) -> OSStatus;
}

/// Convert a status into a [Result].
fn cvt(status: OSStatus) -> Result<(), CodeIdentityError> {
    if status == ERR_SEC_SUCCESS {
        Ok(())
    } else {
        Err(CodeIdentityError::Oracle(status))
    }
}

fn path_to_url(path: &Path) -> Result<CFURL, CodeIdentityError> {
    CFURL::from_path(path, path.is_dir())
        .ok_or_else(|| CodeIdentityError::PathConversion(path.to_path_buf()))
}

fn url_to_path(url: &CFURL) -> Result<PathBuf, CodeIdentityError> {
    url.to_path().ok_or_else(|| {
        CodeIdentityError::PathConversion(PathBuf::from(url.get_string().to_string()))
    })
}

/// [CodeSigningOracle] backed by `Security.framework`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecurityFrameworkOracle;

impl SecurityFrameworkOracle {
    fn guest_attributes(
        attributes: &GuestAttributes,
    ) -> Result<SecGuestAttributes, CodeIdentityError> {
        let mut attrs = SecGuestAttributes::new();

        if let Some(pid) = attributes.pid {
            attrs.set_pid(pid);
        }
        if let Some(token) = &attributes.audit_token {
            // The dictionary retains the value.
            let data = CFData::from_buffer(&token.to_bytes());
            attrs.set_audit_token(data.as_concrete_TypeRef());
        }
        if let Some(path) = &attributes.canonical_path {
            let url = path_to_url(path)?;
            attrs.set_other(unsafe { kSecGuestAttributeCanonical }, url.as_CFTypeRef());
        }

        Ok(attrs)
    }
}

impl CodeSigningOracle for SecurityFrameworkOracle {
    type Code = SecCode;
    type StaticCode = SecStaticCode;
    type Requirement = SecRequirement;

    fn copy_self(&self) -> Result<Self::Code, CodeIdentityError> {
        Ok(SecCode::for_self(Flags::NONE)?)
    }

    fn copy_guest(
        &self,
        host: Option<&Self::Code>,
        attributes: &GuestAttributes,
    ) -> Result<Self::Code, CodeIdentityError> {
        let attrs = Self::guest_attributes(attributes)?;

        Ok(SecCode::copy_guest_with_attribues(host, &attrs, Flags::NONE)?)
    }

    fn static_code_from_path(&self, path: &Path) -> Result<Self::StaticCode, CodeIdentityError> {
        let url = path_to_url(path)?;

        Ok(SecStaticCode::from_path(&url, Flags::NONE)?)
    }

    fn copy_static_code(&self, code: &Self::Code) -> Result<Self::StaticCode, CodeIdentityError> {
        let mut static_code = ptr::null_mut();
        cvt(unsafe { SecCodeCopyStaticCode(code.as_concrete_TypeRef(), 0, &mut static_code) })?;

        Ok(unsafe { SecStaticCode::wrap_under_create_rule(static_code) })
    }

    fn copy_path(&self, code: &Self::StaticCode) -> Result<PathBuf, CodeIdentityError> {
        url_to_path(&code.path(Flags::NONE)?)
    }

    // security-framework's check_validity() requires a requirement and only
    // takes the flags it knows about, so these call into the framework directly.

    fn check_validity(
        &self,
        code: &Self::Code,
        flags: ValidityFlags,
        requirement: Option<&Self::Requirement>,
    ) -> Result<(), CodeIdentityError> {
        let requirement = requirement.map_or(ptr::null_mut(), |r| r.as_concrete_TypeRef());

        cvt(unsafe { SecCodeCheckValidity(code.as_concrete_TypeRef(), flags.bits(), requirement) })
    }

    fn check_static_validity(
        &self,
        code: &Self::StaticCode,
        flags: ValidityFlags,
        requirement: Option<&Self::Requirement>,
    ) -> Result<(), CodeIdentityError> {
        let requirement = requirement.map_or(ptr::null_mut(), |r| r.as_concrete_TypeRef());

        cvt(unsafe {
            SecStaticCodeCheckValidity(code.as_concrete_TypeRef(), flags.bits(), requirement)
        })
    }

    fn create_requirement(&self, text: &str) -> Result<Self::Requirement, CodeIdentityError> {
        Ok(SecRequirement::from_str(text)?)
    }

    fn copy_signing_information(
        &self,
        code: &Self::StaticCode,
        flags: InformationFlags,
    ) -> Result<SigningInformation, CodeIdentityError> {
        let mut info = ptr::null();
        cvt(unsafe {
            SecCodeCopySigningInformation(code.as_concrete_TypeRef(), flags.bits(), &mut info)
        })?;

        let info: CFDictionary<CFType, CFType> =
            unsafe { CFDictionary::wrap_under_create_rule(info) };

        let values = dictionary_to_mapping(&info);
        debug!("received {} signing information entries", values.len());

        Ok(SigningInformation::new(values))
    }
}

fn dictionary_to_mapping(dict: &CFDictionary<CFType, CFType>) -> BTreeMap<String, SigningValue> {
    let (keys, values) = dict.get_keys_and_values();

    keys.into_iter()
        .zip(values.into_iter())
        .filter_map(|(key, value)| {
            let key = unsafe { CFType::wrap_under_get_rule(key as CFTypeRef) };
            let value = unsafe { CFType::wrap_under_get_rule(value as CFTypeRef) };

            // Every key code signing services emits is a string.
            key.downcast::<CFString>()
                .map(|key| (key.to_string(), cf_to_signing_value(&value)))
        })
        .collect()
}

/// Convert an arbitrary CoreFoundation value into a [SigningValue].
fn cf_to_signing_value(value: &CFType) -> SigningValue {
    if let Some(v) = value.downcast::<CFBoolean>() {
        SigningValue::Boolean(v.into())
    } else if let Some(v) = value.downcast::<CFNumber>() {
        // Integer conversion fails when it would be lossy.
        v.to_i64()
            .map(SigningValue::Integer)
            .or_else(|| v.to_f64().map(SigningValue::Real))
            .unwrap_or(SigningValue::Unsupported)
    } else if let Some(v) = value.downcast::<CFString>() {
        SigningValue::String(v.to_string())
    } else if let Some(v) = value.downcast::<CFData>() {
        SigningValue::Data(v.bytes().to_vec())
    } else if let Some(v) = value.downcast::<CFURL>() {
        match v.to_path() {
            Some(path) => SigningValue::String(path.display().to_string()),
            None => SigningValue::String(v.get_string().to_string()),
        }
    } else if value.type_of() == CFDictionary::<CFType, CFType>::type_id() {
        let v: CFDictionary<CFType, CFType> =
            unsafe { CFDictionary::wrap_under_get_rule(value.as_CFTypeRef() as _) };
        SigningValue::Mapping(dictionary_to_mapping(&v))
    } else if value.type_of() == CFArray::<CFType>::type_id() {
        let v: CFArray<CFType> = unsafe { CFArray::wrap_under_get_rule(value.as_CFTypeRef() as _) };
        SigningValue::Array(v.iter().map(|item| cf_to_signing_value(&item)).collect())
    } else {
        SigningValue::Unsupported
    }
}
