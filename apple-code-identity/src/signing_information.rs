// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing information describing a code identity.
//!
//! Code signing services report signing information as a dictionary keyed by
//! well-known strings, with values of varying types. We preserve that shape
//! with [SigningValue] so consumers match on the type of a value instead of
//! assuming one.

use {
    crate::{error::CodeIdentityError, flags::CodeSignatureFlags},
    serde::Serialize,
    std::{collections::BTreeMap, io::Cursor, path::PathBuf},
};

/// Well-known keys in signing information.
pub mod keys {
    pub const FLAGS: &str = "flags";
    pub const ENTITLEMENTS_DICT: &str = "entitlements-dict";
    pub const ENTITLEMENTS: &str = "entitlements";
    pub const IDENTIFIER: &str = "identifier";
    pub const TEAM_IDENTIFIER: &str = "teamid";
    pub const FORMAT: &str = "format";
    pub const MAIN_EXECUTABLE: &str = "main-executable";
    pub const STATUS: &str = "status";
    pub const UNIQUE: &str = "unique";
    pub const SOURCE: &str = "source";
    pub const INFO_PLIST: &str = "info-plist";
    pub const DIGEST_ALGORITHM: &str = "digest-algorithm";
    pub const RUNTIME_VERSION: &str = "runtime-version";
    pub const CERTIFICATES: &str = "certificates";
}

/// A value in signing information.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SigningValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Data(Vec<u8>),
    Array(Vec<SigningValue>),
    Mapping(BTreeMap<String, SigningValue>),
    /// A platform object we don't model, such as a certificate or trust reference.
    Unsupported,
}

impl SigningValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, SigningValue>> {
        match self {
            Self::Mapping(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for SigningValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<plist::Value> for SigningValue {
    fn from(v: plist::Value) -> Self {
        match v {
            plist::Value::Boolean(v) => Self::Boolean(v),
            plist::Value::Integer(v) => match v.as_signed() {
                Some(v) => Self::Integer(v),
                // Only values above i64::MAX lack a signed form.
                None => Self::Real(v.as_unsigned().unwrap_or_default() as f64),
            },
            plist::Value::Real(v) => Self::Real(v),
            plist::Value::String(v) => Self::String(v),
            plist::Value::Data(v) => Self::Data(v),
            plist::Value::Array(v) => Self::Array(v.into_iter().map(Self::from).collect()),
            plist::Value::Dictionary(v) => {
                Self::Mapping(v.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
            _ => Self::Unsupported,
        }
    }
}

/// Signing information for a single code identity.
///
/// Obtained once per query. Nothing here is cached or updated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SigningInformation {
    values: BTreeMap<String, SigningValue>,
}

impl FromIterator<(String, SigningValue)> for SigningInformation {
    fn from_iter<T: IntoIterator<Item = (String, SigningValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl SigningInformation {
    pub fn new(values: BTreeMap<String, SigningValue>) -> Self {
        Self { values }
    }

    /// Construct an instance from an entitlements plist (XML or binary).
    ///
    /// Only the entitlements dictionary is populated. `flags` optionally supplies
    /// the code signature flags so the result can be evaluated as if it came
    /// from signed code.
    pub fn from_entitlements_plist(
        data: &[u8],
        flags: Option<CodeSignatureFlags>,
    ) -> Result<Self, CodeIdentityError> {
        let value =
            plist::Value::from_reader(Cursor::new(data)).map_err(CodeIdentityError::PlistParse)?;

        let mut info = Self::default();
        info.insert(keys::ENTITLEMENTS_DICT, value.into());
        if let Some(flags) = flags {
            info.insert(keys::FLAGS, SigningValue::Integer(flags.bits() as i64));
        }

        Ok(info)
    }

    pub fn get(&self, key: &str) -> Option<&SigningValue> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl ToString, value: SigningValue) -> Option<SigningValue> {
        self.values.insert(key.to_string(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SigningValue)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.get(keys::IDENTIFIER).and_then(SigningValue::as_str)
    }

    pub fn team_identifier(&self) -> Option<&str> {
        self.get(keys::TEAM_IDENTIFIER).and_then(SigningValue::as_str)
    }

    pub fn main_executable(&self) -> Option<PathBuf> {
        self.get(keys::MAIN_EXECUTABLE)
            .and_then(SigningValue::as_str)
            .map(PathBuf::from)
    }

    /// The raw integer under the `flags` key, if present and an integer.
    pub fn raw_flags(&self) -> Option<i64> {
        self.get(keys::FLAGS).and_then(SigningValue::as_integer)
    }

    /// Code signature flags, with unknown bits dropped.
    pub fn code_signature_flags(&self) -> Option<CodeSignatureFlags> {
        self.raw_flags()
            .map(|v| CodeSignatureFlags::from_bits_truncate(v as u32))
    }

    /// The entitlements dictionary, if present and a mapping.
    pub fn entitlements(&self) -> Option<&BTreeMap<String, SigningValue>> {
        self.get(keys::ENTITLEMENTS_DICT)
            .and_then(SigningValue::as_mapping)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    const ENTITLEMENTS_XML: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
        <plist version="1.0">
        <dict>
            <key>com.apple.security.cs.allow-jit</key>
            <true/>
            <key>com.apple.security.get-task-allow</key>
            <integer>1</integer>
            <key>com.apple.application-identifier</key>
            <string>TEAM.com.example.app</string>
        </dict>
        </plist>
    "#};

    #[test]
    fn parse_entitlements_plist() -> Result<(), CodeIdentityError> {
        let info = SigningInformation::from_entitlements_plist(
            ENTITLEMENTS_XML.as_bytes(),
            Some(CodeSignatureFlags::RUNTIME),
        )?;

        let entitlements = info.entitlements().unwrap();
        assert_eq!(entitlements.len(), 3);
        assert_eq!(
            entitlements.get("com.apple.security.cs.allow-jit"),
            Some(&SigningValue::Boolean(true))
        );
        assert_eq!(
            entitlements.get("com.apple.security.get-task-allow"),
            Some(&SigningValue::Integer(1))
        );
        assert_eq!(info.raw_flags(), Some(0x10000));
        assert_eq!(info.code_signature_flags(), Some(CodeSignatureFlags::RUNTIME));

        Ok(())
    }

    #[test]
    fn parse_bad_plist() {
        assert!(matches!(
            SigningInformation::from_entitlements_plist(b"not a plist", None),
            Err(CodeIdentityError::PlistParse(_))
        ));
    }

    #[test]
    fn typed_accessors_check_types() {
        let info = SigningInformation::from_iter([
            (keys::IDENTIFIER.to_string(), SigningValue::Integer(7)),
            (keys::TEAM_IDENTIFIER.to_string(), "ABCDE12345".into()),
            (keys::FLAGS.to_string(), "0x10000".into()),
            (keys::ENTITLEMENTS_DICT.to_string(), SigningValue::Boolean(true)),
        ]);

        assert_eq!(info.identifier(), None);
        assert_eq!(info.team_identifier(), Some("ABCDE12345"));
        assert_eq!(info.raw_flags(), None);
        assert!(info.entitlements().is_none());
        assert!(info.main_executable().is_none());
    }

    #[test]
    fn serialize_json() -> Result<(), CodeIdentityError> {
        let info = SigningInformation::from_iter([
            (keys::FLAGS.to_string(), SigningValue::Integer(0x10000)),
            (keys::IDENTIFIER.to_string(), "com.example.app".into()),
            (keys::CERTIFICATES.to_string(), SigningValue::Unsupported),
        ]);

        assert_eq!(
            serde_json::to_string(&info)?,
            r#"{"certificates":null,"flags":65536,"identifier":"com.example.app"}"#
        );

        Ok(())
    }
}
