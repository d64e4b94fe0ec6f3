// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Policy checks over signing information.
//!
//! The functions in this module never fail. Missing or malformed signing
//! information produces a result rather than an error; see each function for
//! which way it leans.

use {
    crate::{
        flags::CodeSignatureFlags,
        signing_information::{keys, SigningInformation, SigningValue},
    },
    log::warn,
    serde::Serialize,
};

/// Entitlements that weaken runtime protections of a process.
pub const DANGEROUS_ENTITLEMENTS: [&str; 4] = [
    "com.apple.security.get-task-allow",
    "com.apple.security.cs.disable-library-validation",
    "com.apple.security.cs.allow-dyld-environment-variables",
    "com.apple.security.cs.allow-unsigned-executable-memory",
];

/// Whether signing information indicates the hardened runtime is enabled.
///
/// Returns `false` if the `flags` key is absent or not an integer.
pub fn has_hardened_runtime(info: &SigningInformation) -> bool {
    match info.get(keys::FLAGS) {
        Some(SigningValue::Integer(flags)) => {
            let runtime = CodeSignatureFlags::RUNTIME.bits() as i64;
            flags & runtime == runtime
        }
        Some(value) => {
            warn!("ignoring non-integer signing flags: {:?}", value);
            false
        }
        None => false,
    }
}

/// Whether no dangerous entitlement is granted.
///
/// Returns `false` as soon as any entry of [DANGEROUS_ENTITLEMENTS] is present
/// with the integer value `1`. Returns `true` otherwise, including when
/// there is no entitlements dictionary at all.
///
/// Only integer `1` counts as granted. A boolean `true` does not. Use
/// [granted_dangerous_entitlements] to also catch the boolean form.
pub fn entitlements_are_safe(info: &SigningInformation) -> bool {
    let entitlements = match info.get(keys::ENTITLEMENTS_DICT) {
        Some(SigningValue::Mapping(entitlements)) => entitlements,
        Some(value) => {
            warn!("ignoring non-dictionary entitlements: {:?}", value);
            return true;
        }
        None => return true,
    };

    !DANGEROUS_ENTITLEMENTS
        .iter()
        .any(|name| matches!(entitlements.get(*name), Some(SigningValue::Integer(1))))
}

/// Obtain the dangerous entitlements that are granted.
///
/// An entitlement is granted if its value is integer `1` or boolean `true`.
/// Results are in [DANGEROUS_ENTITLEMENTS] order.
pub fn granted_dangerous_entitlements(info: &SigningInformation) -> Vec<&'static str> {
    let entitlements = if let Some(entitlements) = info.entitlements() {
        entitlements
    } else {
        return vec![];
    };

    DANGEROUS_ENTITLEMENTS
        .iter()
        .copied()
        .filter(|name| {
            matches!(
                entitlements.get(*name),
                Some(SigningValue::Integer(1)) | Some(SigningValue::Boolean(true))
            )
        })
        .collect()
}

/// The combined result of all policy checks.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SigningAssessment {
    pub identifier: Option<String>,
    pub team_identifier: Option<String>,
    pub hardened_runtime: bool,
    pub entitlements_safe: bool,
    pub granted_dangerous_entitlements: Vec<&'static str>,
}

impl SigningAssessment {
    pub fn evaluate(info: &SigningInformation) -> Self {
        let granted = granted_dangerous_entitlements(info);

        for name in &granted {
            warn!("dangerous entitlement granted: {}", name);
        }

        Self {
            identifier: info.identifier().map(|s| s.to_string()),
            team_identifier: info.team_identifier().map(|s| s.to_string()),
            hardened_runtime: has_hardened_runtime(info),
            entitlements_safe: entitlements_are_safe(info),
            granted_dangerous_entitlements: granted,
        }
    }

    /// Whether the hardened runtime is on and no dangerous entitlement is granted
    /// in either representation.
    pub fn passes(&self) -> bool {
        self.hardened_runtime
            && self.entitlements_safe
            && self.granted_dangerous_entitlements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::BTreeMap};

    fn with_flags(flags: SigningValue) -> SigningInformation {
        SigningInformation::from_iter([(keys::FLAGS.to_string(), flags)])
    }

    fn with_entitlements(entries: &[(&str, SigningValue)]) -> SigningInformation {
        SigningInformation::from_iter([(
            keys::ENTITLEMENTS_DICT.to_string(),
            SigningValue::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect::<BTreeMap<_, _>>(),
            ),
        )])
    }

    #[test]
    fn hardened_runtime_flag() {
        assert!(has_hardened_runtime(&with_flags(SigningValue::Integer(0x10000))));
        assert!(has_hardened_runtime(&with_flags(SigningValue::Integer(0x00010001))));
        assert!(!has_hardened_runtime(&with_flags(SigningValue::Integer(0x1))));
        assert!(!has_hardened_runtime(&SigningInformation::default()));
    }

    #[test]
    fn hardened_runtime_malformed_flags() {
        assert!(!has_hardened_runtime(&with_flags("65536".into())));
        assert!(!has_hardened_runtime(&with_flags(SigningValue::Boolean(true))));
    }

    #[test]
    fn entitlements_absent_is_safe() {
        assert!(entitlements_are_safe(&SigningInformation::default()));
        assert!(entitlements_are_safe(&with_flags(SigningValue::Integer(0))));
    }

    #[test]
    fn entitlements_empty_is_safe() {
        assert!(entitlements_are_safe(&with_entitlements(&[])));
    }

    #[test]
    fn entitlements_not_a_mapping_is_safe() {
        let info = SigningInformation::from_iter([(
            keys::ENTITLEMENTS_DICT.to_string(),
            SigningValue::Data(vec![0xfa, 0xde]),
        )]);

        assert!(entitlements_are_safe(&info));
        assert!(granted_dangerous_entitlements(&info).is_empty());
    }

    #[test]
    fn get_task_allow_integer() {
        let info = with_entitlements(&[(
            "com.apple.security.get-task-allow",
            SigningValue::Integer(1),
        )]);
        assert!(!entitlements_are_safe(&info));

        let info = with_entitlements(&[(
            "com.apple.security.get-task-allow",
            SigningValue::Integer(0),
        )]);
        assert!(entitlements_are_safe(&info));
    }

    #[test]
    fn every_denylisted_entitlement_is_detected() {
        for name in DANGEROUS_ENTITLEMENTS {
            let info = with_entitlements(&[(name, SigningValue::Integer(1))]);
            assert!(!entitlements_are_safe(&info), "{}", name);
            assert_eq!(granted_dangerous_entitlements(&info), vec![name]);
        }
    }

    #[test]
    fn other_entitlements_are_ignored() {
        let info = with_entitlements(&[
            ("com.apple.security.cs.allow-jit", SigningValue::Integer(1)),
            ("com.apple.security.network.client", SigningValue::Integer(1)),
        ]);

        assert!(entitlements_are_safe(&info));
        assert!(granted_dangerous_entitlements(&info).is_empty());
    }

    #[test]
    fn boolean_representation() {
        let info = with_entitlements(&[(
            "com.apple.security.cs.disable-library-validation",
            SigningValue::Boolean(true),
        )]);

        // Only the integer form trips the compatibility check.
        assert!(entitlements_are_safe(&info));
        assert_eq!(
            granted_dangerous_entitlements(&info),
            vec!["com.apple.security.cs.disable-library-validation"]
        );

        let info = with_entitlements(&[(
            "com.apple.security.cs.disable-library-validation",
            SigningValue::Boolean(false),
        )]);
        assert!(entitlements_are_safe(&info));
        assert!(granted_dangerous_entitlements(&info).is_empty());
    }

    #[test]
    fn non_integer_values_do_not_count() {
        let info = with_entitlements(&[
            ("com.apple.security.get-task-allow", "1".into()),
            (
                "com.apple.security.cs.allow-unsigned-executable-memory",
                SigningValue::Integer(2),
            ),
        ]);

        assert!(entitlements_are_safe(&info));
        assert!(granted_dangerous_entitlements(&info).is_empty());
    }

    #[test]
    fn assessment() {
        let mut info = with_entitlements(&[
            ("com.apple.security.get-task-allow", SigningValue::Integer(1)),
            (
                "com.apple.security.cs.allow-dyld-environment-variables",
                SigningValue::Boolean(true),
            ),
        ]);
        info.insert(keys::FLAGS, SigningValue::Integer(0x10000));
        info.insert(keys::IDENTIFIER, "com.example.app".into());

        let assessment = SigningAssessment::evaluate(&info);
        assert_eq!(assessment.identifier.as_deref(), Some("com.example.app"));
        assert!(assessment.team_identifier.is_none());
        assert!(assessment.hardened_runtime);
        assert!(!assessment.entitlements_safe);
        assert_eq!(
            assessment.granted_dangerous_entitlements,
            vec![
                "com.apple.security.get-task-allow",
                "com.apple.security.cs.allow-dyld-environment-variables",
            ]
        );
        assert!(!assessment.passes());

        let clean = SigningAssessment::evaluate(&with_flags(SigningValue::Integer(0x10000)));
        assert!(clean.passes());
    }
}
