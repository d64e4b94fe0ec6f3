// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod error;
#[allow(unused)]
mod evaluator;
#[allow(unused)]
mod flags;
#[allow(non_upper_case_globals, unused)]
#[cfg(target_os = "macos")]
mod macos;
#[allow(unused)]
mod oracle;
#[allow(unused)]
mod requirement;
#[allow(unused)]
mod resolver;
#[allow(unused)]
mod signing_information;

use {
    crate::{
        error::CodeIdentityError,
        evaluator::SigningAssessment,
        flags::{CodeSignatureFlags, InformationFlags},
        oracle::Pid,
        requirement::{build_requirement, RequirementPreset},
        signing_information::SigningInformation,
    },
    clap::{Arg, ArgGroup, ArgMatches, Command},
    log::LevelFilter,
    serde::Serialize,
    std::{path::PathBuf, str::FromStr},
};

#[cfg(target_os = "macos")]
use {
    crate::{
        flags::ValidityFlags,
        macos::SecurityFrameworkOracle,
        oracle::CodeIdentity,
        resolver::CodeIdentityResolver,
    },
    log::info,
};

const ASSESS_ABOUT: &str = "\
Assess the signing information of code against runtime hardening policies.

The hardened runtime must be enabled and none of the following entitlements
may be granted:

  com.apple.security.get-task-allow
  com.apple.security.cs.disable-library-validation
  com.apple.security.cs.allow-dyld-environment-variables
  com.apple.security.cs.allow-unsigned-executable-memory

The command exits non-zero if the assessment does not pass.
";

const VERIFY_ABOUT: &str = "\
Validate code with the operating system's code signing services.

Without --requirement, only the internal consistency of the signature is
checked. --requirement accepts one of the presets `apple`, `developer`, and
`app-store`, or an arbitrary code requirement expression.

By default, validation of on-disk code checks all architectures and nested
code but does not validate sealed resources. Pass --strict to validate
resources too.

A failure means the code could not be validated. It does not mean the code
is unsigned.
";

const EVALUATE_ENTITLEMENTS_ABOUT: &str = "\
Evaluate an entitlements plist file against runtime hardening policies.

This does not require code signing services and works on any platform.
Use --code-signature-flag to supply flags that would accompany the
entitlements in a signature (e.g. `runtime`).
";

/// Which code a command operates on.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
enum Target {
    Myself,
    Parent,
    Pid(Pid),
    Path(PathBuf),
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl Target {
    fn from_args(args: &ArgMatches) -> Result<Self, CodeIdentityError> {
        if args.is_present("self") {
            Ok(Self::Myself)
        } else if args.is_present("parent") {
            Ok(Self::Parent)
        } else if let Some(pid) = args.value_of("pid") {
            Ok(Self::Pid(
                Pid::from_str(pid).map_err(|_| CodeIdentityError::CliBadArgument)?,
            ))
        } else if let Some(path) = args.value_of("path") {
            Ok(Self::Path(PathBuf::from(path)))
        } else {
            Err(CodeIdentityError::CliBadArgument)
        }
    }

    #[cfg(target_os = "macos")]
    fn resolve(
        &self,
        resolver: &CodeIdentityResolver<SecurityFrameworkOracle>,
    ) -> Result<CodeIdentity<SecurityFrameworkOracle>, CodeIdentityError> {
        match self {
            Self::Myself => resolver.resolve_self(),
            Self::Parent => resolver.resolve_parent(),
            Self::Pid(pid) => resolver.resolve_by_pid(*pid),
            Self::Path(path) => resolver.resolve_by_path(path),
        }
    }
}

fn add_target_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("self")
                .long("self")
                .help("Operate on the running rcodeident process"),
        )
        .arg(
            Arg::new("parent")
                .long("parent")
                .help("Operate on the parent process"),
        )
        .arg(
            Arg::new("pid")
                .long("pid")
                .takes_value(true)
                .help("Operate on the process with this pid"),
        )
        .arg(
            Arg::new("path")
                .long("path")
                .takes_value(true)
                .help("Operate on on-disk code at this path"),
        )
        .group(
            ArgGroup::new("target")
                .args(&["self", "parent", "pid", "path"])
                .required(true),
        )
}

fn information_arg() -> Arg<'static> {
    Arg::new("information")
        .long("information")
        .takes_value(true)
        .multiple_occurrences(true)
        .possible_values(&[
            "internal",
            "signing",
            "requirement",
            "dynamic",
            "content",
            "skip-resource-directory",
            "cms-digest",
        ])
        .help("Signing information to request (defaults to signing and requirement)")
}

fn print_json(value: &impl Serialize) -> Result<(), CodeIdentityError> {
    serde_json::to_writer_pretty(std::io::stdout(), value)?;
    println!();

    Ok(())
}

/// Resolve `--information` values, defaulting to what assessment needs.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn information_flags(args: &ArgMatches) -> Result<InformationFlags, CodeIdentityError> {
    if let Some(values) = args.values_of("information") {
        let mut flags = InformationFlags::empty();
        for value in values {
            flags |= InformationFlags::from_str(value)?;
        }
        Ok(flags)
    } else {
        Ok(InformationFlags::assessment())
    }
}

#[cfg(target_os = "macos")]
fn target_signing_information(args: &ArgMatches) -> Result<SigningInformation, CodeIdentityError> {
    let target = Target::from_args(args)?;

    let flags = information_flags(args)?;

    let resolver = CodeIdentityResolver::system();
    let identity = target.resolve(&resolver)?;

    if let Ok(path) = resolver.path_of(&identity) {
        info!("code path: {}", path.display());
    }

    resolver.signing_information(&identity, Some(flags))
}

#[cfg(not(target_os = "macos"))]
fn target_signing_information(_args: &ArgMatches) -> Result<SigningInformation, CodeIdentityError> {
    Err(CodeIdentityError::CliGeneralError(
        "code signing services only supported on macOS".to_string(),
    ))
}

fn command_assess(args: &ArgMatches) -> Result<(), CodeIdentityError> {
    let info = target_signing_information(args)?;
    let assessment = SigningAssessment::evaluate(&info);

    print_json(&assessment)?;

    if assessment.passes() {
        Ok(())
    } else {
        Err(CodeIdentityError::CliGeneralError(
            "assessment did not pass".to_string(),
        ))
    }
}

fn code_signature_flags(
    args: &ArgMatches,
) -> Result<Option<CodeSignatureFlags>, CodeIdentityError> {
    if let Some(values) = args.values_of("code_signature_flag") {
        let mut flags = CodeSignatureFlags::empty();
        for value in values {
            flags |= CodeSignatureFlags::from_str(value)?;
        }
        Ok(Some(flags))
    } else {
        Ok(None)
    }
}

fn command_evaluate_entitlements(args: &ArgMatches) -> Result<(), CodeIdentityError> {
    let path = args
        .value_of("path")
        .expect("clap should have validated argument");

    let flags = code_signature_flags(args)?;

    let data = std::fs::read(path)?;
    let info = SigningInformation::from_entitlements_plist(&data, flags)?;

    print_json(&SigningAssessment::evaluate(&info))
}

fn command_print_requirement(args: &ArgMatches) -> Result<(), CodeIdentityError> {
    if let Some(preset) = args.value_of("preset") {
        println!("{}", RequirementPreset::try_from(preset)?.as_str());
    } else {
        let bundle_id = args
            .value_of("bundle_id")
            .expect("clap should have validated argument");
        let subject_cn = args
            .value_of("subject_cn")
            .expect("clap should have validated argument");

        println!("{}", build_requirement(bundle_id, subject_cn));
    }

    Ok(())
}

fn command_print_signing_info(args: &ArgMatches) -> Result<(), CodeIdentityError> {
    let info = target_signing_information(args)?;

    print_json(&info)
}

#[cfg(target_os = "macos")]
fn command_verify(args: &ArgMatches) -> Result<(), CodeIdentityError> {
    let target = Target::from_args(args)?;

    let mut flags = if let Some(values) = args.values_of("flag") {
        Some(ValidityFlags::from_strs(&values.collect::<Vec<_>>())?)
    } else {
        None
    };
    if args.is_present("strict") {
        let defaults = if matches!(target, Target::Path(_)) {
            ValidityFlags::default_static() - ValidityFlags::DO_NOT_VALIDATE_RESOURCES
        } else {
            ValidityFlags::default_dynamic()
        };
        flags = Some(flags.unwrap_or(defaults) | ValidityFlags::STRICT_VALIDATE);
    }

    let resolver = CodeIdentityResolver::system();
    let identity = target.resolve(&resolver)?;

    let outcome = if let Some(requirement) = args.value_of("requirement") {
        let requirement = match RequirementPreset::try_from(requirement) {
            Ok(preset) => preset.as_str(),
            Err(_) => requirement,
        };
        info!("validating against requirement: {}", requirement);

        resolver.validate_against(&identity, requirement, flags)?
    } else {
        resolver.validate(&identity, None, flags)?
    };

    outcome.into_result()?;
    println!("valid");

    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn command_verify(_args: &ArgMatches) -> Result<(), CodeIdentityError> {
    Err(CodeIdentityError::CliGeneralError(
        "code signing services only supported on macOS".to_string(),
    ))
}

fn evaluate_entitlements_command() -> Command<'static> {
    Command::new("evaluate-entitlements")
        .about("Evaluate an entitlements plist against runtime hardening policies")
        .long_about(EVALUATE_ENTITLEMENTS_ABOUT)
        .arg(
            Arg::new("code_signature_flag")
                .long("code-signature-flag")
                .takes_value(true)
                .multiple_occurrences(true)
                .possible_values(&[
                    "host",
                    "adhoc",
                    "hard",
                    "kill",
                    "expires",
                    "restrict",
                    "enforcement",
                    "library",
                    "runtime",
                    "linker-signed",
                ])
                .help("Code signature flag accompanying the entitlements"),
        )
        .arg(
            Arg::new("path")
                .required(true)
                .help("Path to entitlements plist to evaluate"),
        )
}

fn main_impl() -> Result<(), CodeIdentityError> {
    let app = Command::new("Inspect Apple code identities")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Resolve, validate, and assess code with Apple's code signing services")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(add_target_args(
        Command::new("assess")
            .about("Assess code against runtime hardening policies")
            .long_about(ASSESS_ABOUT)
            .arg(information_arg()),
    ));

    let app = app.subcommand(evaluate_entitlements_command());

    let app = app.subcommand(
        Command::new("print-requirement")
            .about("Print a templated code requirement expression")
            .arg(
                Arg::new("preset")
                    .long("preset")
                    .takes_value(true)
                    .possible_values(&["apple", "developer", "app-store"])
                    .help("Well-known requirement to print"),
            )
            .arg(
                Arg::new("bundle_id")
                    .long("bundle-id")
                    .takes_value(true)
                    .requires("subject_cn")
                    .help("Bundle identifier to pin the requirement to"),
            )
            .arg(
                Arg::new("subject_cn")
                    .long("subject-cn")
                    .takes_value(true)
                    .requires("bundle_id")
                    .help("Common name of the signing certificate to pin the requirement to"),
            )
            .group(
                ArgGroup::new("requirement")
                    .args(&["preset", "bundle_id"])
                    .required(true),
            ),
    );

    let app = app.subcommand(add_target_args(
        Command::new("print-signing-info")
            .about("Print signing information as JSON")
            .arg(information_arg()),
    ));

    let app = app.subcommand(add_target_args(
        Command::new("verify")
            .about("Validate code, optionally against a code requirement")
            .long_about(VERIFY_ABOUT)
            .arg(
                Arg::new("requirement")
                    .long("requirement")
                    .takes_value(true)
                    .help("Requirement preset name or expression to validate against"),
            )
            .arg(
                Arg::new("flag")
                    .long("flag")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("Validity flag to use instead of the defaults (e.g. nested, strict)"),
            )
            .arg(
                Arg::new("strict")
                    .long("strict")
                    .help("Also validate sealed resources and apply strict validation"),
            ),
    ));

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("assess", args)) => command_assess(args),
        Some(("evaluate-entitlements", args)) => command_evaluate_entitlements(args),
        Some(("print-requirement", args)) => command_print_requirement(args),
        Some(("print-signing-info", args)) => command_print_signing_info(args),
        Some(("verify", args)) => command_verify(args),
        _ => Err(CodeIdentityError::CliUnknownCommand),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
