use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

const POPULATION: &str = r#"
users:
  - dn: CN=Amy Lee,OU=Staff,DC=corp,DC=test
    email: amy@corp.test
    account_name: alee
    display_name: Amy Lee
    department: Sales
    region: TX
  - dn: CN=Ben Ode,OU=Staff,DC=corp,DC=test
    email: ben@corp.test
    account_name: bode
    display_name: Ben Ode
    department: sales
    region: tx
    manager: CN=Amy Lee,OU=Staff,DC=corp,DC=test
  - dn: CN=Cy Park,OU=External Users,DC=corp,DC=test
    email: cy@corp.test
    account_name: cpark
    display_name: Cy Park
    department: Sales
    region: TX
"#;

struct Workspace {
    home: TempDir,
    population: PathBuf,
    state: PathBuf,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let home = TempDir::new().expect("home");
        let population = home.path().join("people.yaml");
        let state = home.path().join("state").join("directories.json");
        let config = home.path().join("rollcall.yaml");
        fs::write(&population, POPULATION).expect("write population");
        fs::write(&config, "email_domain: corp.test\n").expect("write config");
        Self {
            home,
            population,
            state,
            config,
        }
    }

    fn cmd(&self, subcommand: &str) -> Command {
        let mut cmd = rollcall_cmd(self.home.path());
        cmd.arg(subcommand)
            .arg("--population")
            .arg(&self.population)
            .arg("--state")
            .arg(&self.state)
            .arg("--config")
            .arg(&self.config);
        cmd
    }
}

fn rollcall_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rollcall"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn json_report(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().expect("run rollcall");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("stdout is a JSON report")
}

fn outcome<'a>(report: &'a Value, group: &str) -> &'a Value {
    report["outcomes"]
        .as_array()
        .expect("outcomes")
        .iter()
        .find(|o| o["group"]["name"] == group)
        .unwrap_or_else(|| panic!("no outcome for {group}"))
}

fn added(outcome: &Value, backend: &str) -> u64 {
    outcome["backends"]
        .as_array()
        .expect("backends")
        .iter()
        .find(|b| b["backend"] == backend)
        .and_then(|b| b["added"].as_u64())
        .expect("added count")
}

#[test]
fn slug_prints_canonical_form() {
    let home = TempDir::new().unwrap();
    rollcall_cmd(home.path())
        .args(["slug", "  Human Resources & Payroll "])
        .assert()
        .success()
        .stdout("human-resources-payroll\n");
}

#[test]
fn slug_rejects_value_without_name_characters() {
    let home = TempDir::new().unwrap();
    rollcall_cmd(home.path())
        .args(["slug", "!!!"])
        .assert()
        .failure()
        .stderr(contains("does not form a group name"));
}

#[test]
fn sync_writes_state_and_second_run_changes_nothing() {
    let ws = Workspace::new();

    let first = json_report(&mut ws.cmd("sync"));
    assert_eq!(first["dry_run"], false);
    assert!(ws.state.exists(), "state file written");

    let sales = outcome(&first, "list-dept-sales");
    assert_eq!(sales["users"], 2, "external OU user filtered out");
    assert_eq!(added(sales, "a"), 2);
    assert_eq!(added(sales, "b"), 2);
    assert_eq!(outcome(&first, "list-reports-alee")["users"], 2);

    let state: Value = serde_json::from_str(&fs::read_to_string(&ws.state).unwrap()).unwrap();
    let stored = &state["directory_b"]["groups"]["list-dept-sales"];
    assert_eq!(stored["address"], "list-dept-sales@corp.test");
    assert_eq!(stored["members"]["amy@corp.test"], "MANAGER");
    assert_eq!(stored["members"]["ben@corp.test"], "MEMBER");

    let second = json_report(&mut ws.cmd("sync"));
    for o in second["outcomes"].as_array().unwrap() {
        for b in o["backends"].as_array().unwrap() {
            assert_eq!(b["added"], 0, "{o}");
            assert_eq!(b["removed"], 0, "{o}");
        }
    }
}

#[test]
fn dry_run_leaves_state_untouched() {
    let ws = Workspace::new();

    ws.cmd("sync")
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(contains("[dry-run] Rollcall v"))
        .stdout(contains("list-dept-sales@corp.test"));

    assert!(!ws.state.exists());
}

#[test]
fn plan_lists_identities_per_backend() {
    let ws = Workspace::new();

    ws.cmd("plan")
        .args(["--targets", "departments"])
        .assert()
        .success()
        .stdout(contains("list-dept-sales@corp.test"))
        .stdout(contains("(Dept: Sales)"))
        .stdout(contains("amy@corp.test"))
        .stdout(contains("cn=ben ode,ou=staff,dc=corp,dc=test"))
        .stdout(contains("[dry-run] 1 group(s) would change"));

    assert!(!ws.state.exists());
}

#[test]
fn targets_limit_the_run_to_selected_kinds() {
    let ws = Workspace::new();

    let report = json_report(ws.cmd("sync").args(["--targets", "regions,employees"]));
    let names: Vec<&str> = report["outcomes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["group"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["list-state-tx", "list-all-employees"]);
}

#[test]
fn strict_run_without_errors_succeeds() {
    let ws = Workspace::new();
    ws.cmd("sync")
        .arg("--strict")
        .assert()
        .success()
        .stdout(contains("0 errors"));
}

#[test]
fn missing_population_fails_with_context() {
    let ws = Workspace::new();
    fs::remove_file(&ws.population).unwrap();

    ws.cmd("sync")
        .assert()
        .failure()
        .stderr(contains("failed to load population"));
    assert!(!ws.state.exists());
}

#[test]
fn invalid_config_is_rejected() {
    let ws = Workspace::new();
    fs::write(&ws.config, "email_domain: corp.test\nretry:\n  max_attempts: 0\n").unwrap();

    ws.cmd("sync")
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}
