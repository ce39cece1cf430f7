use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use insta::assert_snapshot;
use predicates::str::contains;
use tempfile::tempdir;

const FAKE_NPM: &str = r#"#!/usr/bin/env sh
here=$(cd "$(dirname "$0")" && pwd)
echo "$*" >>"$here/npm-args.log"
if [ -f "$here/npm-fail" ]; then
  echo "npm ERR! network timeout" >&2
  exit 1
fi
case "$1" in
  install)
    if [ "$2" = "--global" ]; then
      mkdir -p "$here/prefix/bin"
      printf '#!/usr/bin/env sh\necho "usage: mathkit"\n' >"$here/prefix/bin/mathkit"
      chmod +x "$here/prefix/bin/mathkit"
    fi
    ;;
  uninstall)
    rm -f "$here/prefix/bin/mathkit"
    ;;
  prefix)
    echo "$here/prefix"
    ;;
esac
exit 0
"#;

const FAKE_NODE: &str = r#"#!/usr/bin/env sh
if [ "$1" = "--version" ]; then
  echo "v20.11.1"
  exit 0
fi
here=$(cd "$(dirname "$0")" && pwd)
if [ -f "$here/node-delay" ]; then
  sleep "$(cat "$here/node-delay")"
fi
[ -f "$1" ]
"#;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

fn config_body(tools: Option<&Path>) -> String {
    let mut body = r#"
[package]
name = "mathkit"
version = "1.2.3"
repository = "https://github.com/example/mathkit.git"
reference = "v1.2.3"

[probe]
function = "add"
args = [2, 3]
submodule = "add"
"#
    .to_string();

    if let Some(tools) = tools {
        body.push_str(&format!(
            "\n[tools]\nnpm = \"{}\"\nnode = \"{}\"\n",
            tools.join("npm").display(),
            tools.join("node").display()
        ));
    }
    body
}

fn write_config(dir: &Path, tools: Option<&Path>) -> PathBuf {
    let path = dir.join("installcheck.toml");
    write_file(&path, &config_body(tools));
    path
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    write_file(path, body);
    let mut perms = fs::metadata(path).expect("meta").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

#[cfg(unix)]
fn create_fake_tools(dir: &Path) -> PathBuf {
    let tools = dir.join("tools");
    write_script(&tools.join("npm"), FAKE_NPM);
    write_script(&tools.join("node"), FAKE_NODE);
    tools
}

fn installcheck_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("installcheck"));
    cmd.env_remove("INSTALLCHECK_NPM_BIN")
        .env_remove("INSTALLCHECK_NODE_BIN");
    cmd
}

#[test]
fn plan_command_snapshot() {
    let td = tempdir().expect("tempdir");
    let config = write_config(td.path(), None);

    let out = installcheck_cmd()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(out).expect("utf8");
    assert_snapshot!(
        stdout,
        @r#"
manager: npm
package: mathkit@1.2.3
source: https://github.com/example/mathkit.git#v1.2.3
retry: 2 attempt(s), 15s backoff
heartbeat: every 5m

[1/4] local install (local)
  setup    create working directory
  setup    write package.json
  setup    write probe-namespace.cjs
  setup    write probe-submodule.cjs
  setup    write probe-namespace.mjs
  setup    write probe-submodule.mjs
  install  npm install mathkit@1.2.3
  test     node probe-namespace.cjs
  test     node probe-submodule.cjs
  test     node probe-namespace.mjs  (ES modules only)
  test     node probe-submodule.mjs  (ES modules only)
  cleanup  remove working directory

[2/4] local install from source control (local-source)
  setup    create working directory
  setup    write package.json
  setup    write probe-namespace.cjs
  setup    write probe-submodule.cjs
  setup    write probe-namespace.mjs
  setup    write probe-submodule.mjs
  install  npm install https://github.com/example/mathkit.git#v1.2.3
  test     node probe-namespace.cjs
  test     node probe-submodule.cjs
  test     node probe-namespace.mjs  (ES modules only)
  test     node probe-submodule.mjs  (ES modules only)
  cleanup  remove working directory

[3/4] global install (global)
  setup    create working directory
  install  npm install --global mathkit@1.2.3
  install  npm ls --global --depth=0
  test     mathkit --help
  cleanup  npm uninstall --global mathkit
  cleanup  npm ls --global --depth=0
  cleanup  remove working directory

[4/4] global install from source control (global-source)
  setup    create working directory
  install  npm install --global https://github.com/example/mathkit.git#v1.2.3
  install  npm ls --global --depth=0
  test     mathkit --help
  cleanup  npm uninstall --global mathkit
  cleanup  npm ls --global --depth=0
  cleanup  remove working directory
"#
    );
}

#[test]
fn plan_applies_cli_overrides() {
    let td = tempdir().expect("tempdir");
    let config = write_config(td.path(), None);

    installcheck_cmd()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .arg("--package-version")
        .arg("next")
        .arg("--reference")
        .arg("develop")
        .arg("--retry-delay")
        .arg("1s")
        .assert()
        .success()
        .stdout(contains("npm install mathkit@next"))
        .stdout(contains("mathkit.git#develop"))
        .stdout(contains("retry: 2 attempt(s), 1s backoff"));
}

#[test]
fn plan_rejects_unknown_manager() {
    let td = tempdir().expect("tempdir");
    let config = write_config(td.path(), None);

    installcheck_cmd()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .arg("yarn")
        .assert()
        .code(1)
        .stderr(contains("unsupported package manager `yarn`"));
}

#[test]
fn unsupported_manager_exits_one_without_running() {
    let td = tempdir().expect("tempdir");
    let config = write_config(td.path(), None);
    let work = td.path().join("work");

    installcheck_cmd()
        .arg("yarn")
        .arg(&work)
        .arg(td.path().join("install.log"))
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(contains("[error] unsupported package manager `yarn` (supported: npm)"));

    assert!(!work.exists());
}

#[test]
fn missing_positionals_exit_one() {
    installcheck_cmd()
        .arg("npm")
        .assert()
        .code(1)
        .stderr(contains("usage: installcheck <MANAGER> <INSTALL_DIR> <LOG_FILE>"));
}

#[test]
fn invalid_config_exits_one() {
    let td = tempdir().expect("tempdir");
    let config = td.path().join("installcheck.toml");
    write_file(&config, "[package]\nname = \"mathkit\"\n");

    installcheck_cmd()
        .arg("npm")
        .arg(td.path().join("work"))
        .arg(td.path().join("install.log"))
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(contains("invalid configuration"));
}

#[test]
fn invalid_duration_flag_exits_one() {
    let td = tempdir().expect("tempdir");
    let config = write_config(td.path(), None);

    installcheck_cmd()
        .arg("--config")
        .arg(&config)
        .arg("--heartbeat-interval")
        .arg("soon")
        .arg("plan")
        .assert()
        .code(1)
        .stderr(contains("invalid duration: soon"));
}

#[test]
fn completions_command_generates_script() {
    installcheck_cmd()
        .arg("completions")
        .arg("bash")
        .assert()
        .success()
        .stdout(contains("installcheck"));
}

#[test]
fn version_flag_succeeds() {
    installcheck_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("installcheck"));
}

#[cfg(unix)]
#[test]
fn full_run_passes_and_writes_receipt() {
    let td = tempdir().expect("tempdir");
    let tools = create_fake_tools(td.path());
    let config = write_config(td.path(), Some(&tools));
    let work = td.path().join("work");
    let log = td.path().join("logs").join("install.log");
    let receipt = td.path().join("receipt.json");

    installcheck_cmd()
        .arg("npm")
        .arg(&work)
        .arg(&log)
        .arg("--config")
        .arg(&config)
        .arg("--receipt")
        .arg(&receipt)
        .assert()
        .success()
        .stdout(contains("local: passed (attempts=1"))
        .stdout(contains("global-source: passed (attempts=1"))
        .stderr(contains("[info] all 4 scenarios passed"));

    assert!(!work.exists());
    let log_text = fs::read_to_string(&log).expect("log");
    assert!(log_text.contains("$ "));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&receipt).expect("receipt")).expect("json");
    assert_eq!(json["receipt_version"], "installcheck.receipt.v1");
    assert_eq!(json["success"], true);
    assert_eq!(json["scenarios"].as_array().expect("array").len(), 4);
}

#[cfg(unix)]
#[test]
fn failing_install_exits_one_after_retry() {
    let td = tempdir().expect("tempdir");
    let tools = create_fake_tools(td.path());
    write_file(&tools.join("npm-fail"), "");
    let config = write_config(td.path(), Some(&tools));
    let receipt = td.path().join("receipt.json");

    installcheck_cmd()
        .arg("npm")
        .arg(td.path().join("work"))
        .arg(td.path().join("install.log"))
        .arg("--config")
        .arg(&config)
        .arg("--retry-delay")
        .arg("10ms")
        .arg("--receipt")
        .arg(&receipt)
        .assert()
        .code(1)
        .stderr(contains("[warn] local attempt 1 failed"))
        .stderr(contains("[error] failed after 2 attempt(s): local: installation failed"));

    let calls = fs::read_to_string(tools.join("npm-args.log")).expect("npm log");
    assert_eq!(calls.lines().filter(|l| l.starts_with("install ")).count(), 2);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&receipt).expect("receipt")).expect("json");
    assert_eq!(json["success"], false);
    assert_eq!(json["scenarios"][0]["state"]["status"], "failed");
    assert_eq!(json["scenarios"][1]["state"]["status"], "not_run");
}

#[cfg(unix)]
#[test]
fn heartbeat_lines_go_to_stderr() {
    let td = tempdir().expect("tempdir");
    let tools = create_fake_tools(td.path());
    write_file(&tools.join("node-delay"), "0.05");
    let config = write_config(td.path(), Some(&tools));

    installcheck_cmd()
        .arg("npm")
        .arg(td.path().join("work"))
        .arg(td.path().join("install.log"))
        .arg("--config")
        .arg(&config)
        .arg("--heartbeat-interval")
        .arg("20ms")
        .assert()
        .success()
        .stderr(contains("[heartbeat] "))
        .stderr(contains("still running"));
}

#[cfg(unix)]
#[test]
fn doctor_reports_tool_versions() {
    let td = tempdir().expect("tempdir");
    let tools = create_fake_tools(td.path());
    let config = write_config(td.path(), Some(&tools));

    installcheck_cmd()
        .arg("--config")
        .arg(&config)
        .arg("doctor")
        .assert()
        .success()
        .stdout(contains("package: mathkit@1.2.3"))
        .stdout(contains("node: v20.11.1"))
        .stdout(contains("es_module_probes: yes (node 20.11.1, requires >= 14)"));
}
