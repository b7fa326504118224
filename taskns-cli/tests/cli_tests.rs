use assert_cmd::Command;
use predicates::prelude::*;
use std::os::unix::fs::symlink;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;

const SIGTERM: i32 = 15;

const KINDS: [&str; 7] = ["cgroup", "ipc", "mnt", "net", "pid", "user", "uts"];

/// Registry whose entries point at the caller's own namespaces and root;
/// joining them needs no privileges
fn self_registry(job: &str, skip: &[&str]) -> tempfile::TempDir {
    let base = tempfile::tempdir().unwrap();
    let dir = base.path().join(job);
    std::fs::create_dir_all(dir.join("ns")).unwrap();
    symlink("/", dir.join("root")).unwrap();
    for name in KINDS.iter().filter(|k| !skip.contains(*k)) {
        symlink(
            Path::new("/proc/self/ns").join(name),
            dir.join("ns").join(name),
        )
        .unwrap();
    }
    base
}

fn taskns() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskns"));
    cmd.env_remove("SLURM_JOB_ID").env_remove("TASKNS_LOG");
    cmd
}

#[test]
fn test_help_command() {
    taskns()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_version_command() {
    taskns()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("taskns"));
}

#[test]
fn test_invalid_command() {
    taskns()
        .arg("invalid")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_run_help() {
    taskns()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--job"))
        .stdout(predicate::str::contains("--registry"))
        .stdout(predicate::str::contains("--best-effort"))
        .stdout(predicate::str::contains("--no-detach"));
}

#[test]
fn test_run_without_command() {
    taskns()
        .args(["run", "--job", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_registry_conflicts_with_env() {
    taskns()
        .args(["run", "--job", "42", "--registry", "/tmp", "--env", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_run_mirrors_exit_code() {
    let base = self_registry("42", &[]);

    taskns()
        .args(["run", "--job", "42", "--registry"])
        .arg(base.path())
        .args(["--", "sh", "-c", "exit 7"])
        .assert()
        .code(7);
}

#[test]
fn test_run_passes_output_through() {
    let base = self_registry("42", &[]);

    taskns()
        .args(["run", "--job", "42", "--registry"])
        .arg(base.path())
        .args(["--", "echo", "hello from job"])
        .assert()
        .success()
        .stdout("hello from job\n");
}

#[test]
fn test_run_job_id_from_environment() {
    let base = self_registry("99", &[]);

    taskns()
        .env("SLURM_JOB_ID", "99")
        .args(["run", "--registry"])
        .arg(base.path())
        .args(["--", "true"])
        .assert()
        .success();
}

#[test]
fn test_run_without_job_id() {
    let base = self_registry("42", &[]);

    taskns()
        .args(["run", "--registry"])
        .arg(base.path())
        .args(["--", "true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Job ID unavailable"));
}

#[test]
fn test_run_mirrors_signal_death() {
    let base = self_registry("42", &[]);

    let output = taskns()
        .args(["run", "--job", "42", "--registry"])
        .arg(base.path())
        .args(["--", "sh", "-c", "kill -TERM $$"])
        .output()
        .unwrap();

    assert_eq!(output.status.signal(), Some(SIGTERM));
}

#[test]
fn test_run_no_detach_execs_in_place() {
    let base = self_registry("42", &[]);

    taskns()
        .args(["run", "--job", "42", "--no-detach", "--registry"])
        .arg(base.path())
        .args(["--", "sh", "-c", "exit 3"])
        .assert()
        .code(3);
}

#[test]
fn test_strict_missing_entry_blocks_exec() {
    let base = self_registry("42", &["pid"]);

    taskns()
        .args(["run", "--job", "42", "--registry"])
        .arg(base.path())
        .args(["--", "echo", "must not run"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("ns/pid"));
}

#[test]
fn test_best_effort_skips_missing_entry() {
    let base = self_registry("42", &["pid", "net"]);

    taskns()
        .args(["run", "--job", "42", "--best-effort", "--registry"])
        .arg(base.path())
        .args(["--", "true"])
        .assert()
        .success();
}

#[test]
fn test_env_strategy_scrubs_variables() {
    taskns()
        .env("SLURM_NS_UTS", "/proc/self/ns/uts")
        .env_remove("SLURM_NS_NET")
        .args(["run", "--env", "--", "sh", "-c", "echo ${SLURM_NS_UTS-unset}"])
        .assert()
        .success()
        .stdout("unset\n");
}

#[test]
fn test_config_file_is_applied() {
    let base = self_registry("42", &[]);
    std::fs::remove_file(base.path().join("42").join("root")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("taskns.json");
    std::fs::write(
        &file,
        format!(
            r#"{{"source": {{"type": "directory", "base-dir": "{}"}}, "relocate-root": false}}"#,
            base.path().display()
        ),
    )
    .unwrap();

    taskns()
        .args(["run", "--job", "42", "--config"])
        .arg(&file)
        .args(["--", "true"])
        .assert()
        .success();
}

#[test]
fn test_inspect_no_root_needed() {
    taskns()
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("Namespace Info:"))
        .stdout(predicate::str::contains("MNT"));
}

#[test]
fn test_inspect_unknown_pid() {
    taskns()
        .args(["inspect", "--pid", "2147483000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to get namespace information"));
}
