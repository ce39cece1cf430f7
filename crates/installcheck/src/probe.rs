//! Probe programs that prove an installed package is loadable.
//!
//! Each probe loads the package (whole namespace or a single sub-module),
//! calls one numeric function and exits non-zero unless it gets a finite
//! number back. CommonJS probes always run; the ES-module variants only run
//! on a Node runtime new enough to `import` packages.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use installcheck_config::Config;
use installcheck_process::{CommandSpec, run_command_in_dir};
use semver::Version;
use serde_json::json;

/// Name of the minimal manifest written into each working directory.
pub const MANIFEST_FILE: &str = "package.json";

/// How a probe loads the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSyntax {
    CommonJs,
    EsModule,
}

/// What a probe loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTarget {
    Namespace,
    Submodule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeProgram {
    pub target: ProbeTarget,
    pub syntax: ModuleSyntax,
    pub file_name: String,
    pub source: String,
}

impl ProbeProgram {
    pub fn requires_esm(&self) -> bool {
        self.syntax == ModuleSyntax::EsModule
    }
}

/// Minimal private manifest so `npm install` has a project to install into.
pub fn manifest_json() -> String {
    let manifest = json!({
        "name": "installcheck-probe",
        "version": "1.0.0",
        "private": true,
        "description": "Temporary project created by installcheck",
    });
    // A `Value` built from literals always serializes.
    serde_json::to_string_pretty(&manifest).unwrap_or_else(|_| manifest.to_string())
}

/// All four probes in execution order: namespace then sub-module, CommonJS
/// before ES module.
pub fn probe_programs(config: &Config) -> Vec<ProbeProgram> {
    let mut probes = Vec::with_capacity(4);
    for syntax in [ModuleSyntax::CommonJs, ModuleSyntax::EsModule] {
        for target in [ProbeTarget::Namespace, ProbeTarget::Submodule] {
            probes.push(build_probe(config, target, syntax));
        }
    }
    probes
}

fn build_probe(config: &Config, target: ProbeTarget, syntax: ModuleSyntax) -> ProbeProgram {
    let package = config.package.name();
    let function = config.probe.function();
    let (specifier, export) = match target {
        ProbeTarget::Namespace => (package.to_string(), function),
        ProbeTarget::Submodule => (
            format!("{package}/{}", config.probe.submodule().trim_start_matches('/')),
            config.probe.submodule_export(),
        ),
    };

    let specifier = js_string(&specifier);
    let export = js_string(export);
    let args = serde_json::to_string(&config.probe.args).unwrap_or_else(|_| "[]".to_string());

    let load = match (target, syntax) {
        (ProbeTarget::Namespace, ModuleSyntax::CommonJs) => format!(
            "const lib = require({specifier});\n\
             const fn = lib[{export}];\n"
        ),
        (ProbeTarget::Submodule, ModuleSyntax::CommonJs) => format!(
            "const mod = require({specifier});\n\
             const fn = typeof mod[{export}] === \"function\" ? mod[{export}]\n  \
             : typeof mod === \"function\" ? mod\n  \
             : mod.default;\n"
        ),
        (ProbeTarget::Namespace, ModuleSyntax::EsModule) => format!(
            "import * as ns from {specifier};\n\
             const lib = typeof ns[{export}] === \"function\" ? ns : ns.default;\n\
             const fn = lib ? lib[{export}] : undefined;\n"
        ),
        (ProbeTarget::Submodule, ModuleSyntax::EsModule) => format!(
            "import * as mod from {specifier};\n\
             const fn = typeof mod[{export}] === \"function\" ? mod[{export}]\n  \
             : typeof mod.default === \"function\" ? mod.default\n  \
             : mod.default ? mod.default[{export}] : undefined;\n"
        ),
    };

    let check = format!(
        "if (typeof fn !== \"function\") {{\n  \
           console.error(`${{{specifier}}} does not export a callable ${{{export}}}`);\n  \
           process.exit(1);\n\
         }}\n\
         const args = {args};\n\
         const result = fn(...args);\n\
         if (typeof result !== \"number\" || !Number.isFinite(result)) {{\n  \
           console.error(`${{{export}}}(${{args.join(\", \")}}) returned ${{String(result)}}`);\n  \
           process.exit(1);\n\
         }}\n\
         console.log(`${{{export}}}(${{args.join(\", \")}}) = ${{result}}`);\n"
    );

    let stem = match target {
        ProbeTarget::Namespace => "namespace",
        ProbeTarget::Submodule => "submodule",
    };
    let extension = match syntax {
        ModuleSyntax::CommonJs => "cjs",
        ModuleSyntax::EsModule => "mjs",
    };

    ProbeProgram {
        target,
        syntax,
        file_name: format!("probe-{stem}.{extension}"),
        source: format!("{load}{check}"),
    }
}

/// JSON string literals are valid JavaScript string literals.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Parse `node --version` output such as `v20.11.1`.
pub fn parse_node_version(output: &str) -> Result<Version> {
    let trimmed = output.trim();
    let raw = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if raw.is_empty() {
        bail!("empty node version output");
    }
    Version::parse(raw).with_context(|| format!("unrecognized node version: {trimmed}"))
}

/// Whether `version` can run the ES-module probes.
pub fn supports_esm(version: &Version, min_major: u64) -> bool {
    version.major >= min_major
}

/// Ask the node runtime for its version, giving up after `timeout`.
pub fn detect_node_version(node: &str, dir: &Path, timeout: Option<Duration>) -> Result<Version> {
    let spec = CommandSpec::new(node, ["--version"]);
    let result = run_command_in_dir(&spec, dir, timeout)?;
    if result.timed_out {
        bail!("{spec} timed out after {}", humantime::format_duration(result.duration()));
    }
    result.ok().with_context(|| format!("{spec} failed"))?;
    parse_node_version(&result.stdout)
}
