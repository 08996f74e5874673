use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn rejects_an_unknown_subcommand() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("fsfs")?;
    cmd.arg("frobnicate").arg("some/path");
    cmd.assert().failure();
    Ok(())
}

#[test]
fn init_then_commit_then_cat_round_trips_a_file() -> Result<(), Box<dyn std::error::Error>> {
    let repo_dir = tempfile::tempdir()?;
    let repo_path = repo_dir.path().join("repo");

    Command::cargo_bin("fsfs")?
        .arg("init")
        .arg(&repo_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));

    let content_file = repo_dir.path().join("hello.txt");
    std::fs::write(&content_file, "hello\n")?;

    Command::cargo_bin("fsfs")?
        .arg("commit")
        .arg(&repo_path)
        .arg("--add")
        .arg(format!("/hello.txt={}", content_file.display()))
        .arg("--author")
        .arg("alice")
        .arg("--log")
        .arg("initial")
        .assert()
        .success()
        .stdout(predicate::str::contains("committed revision 1"));

    Command::cargo_bin("fsfs")?
        .arg("cat")
        .arg(&repo_path)
        .arg("1")
        .arg("/hello.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));

    Command::cargo_bin("fsfs")?
        .arg("log")
        .arg(&repo_path)
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("svn:author: alice"));

    Ok(())
}

#[test]
fn verify_reports_a_clean_freshly_created_repository() -> Result<(), Box<dyn std::error::Error>> {
    let repo_dir = tempfile::tempdir()?;
    let repo_path = repo_dir.path().join("repo");

    Command::cargo_bin("fsfs")?.arg("init").arg(&repo_path).assert().success();

    Command::cargo_bin("fsfs")?
        .arg("verify")
        .arg(&repo_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("clean"));

    Ok(())
}
