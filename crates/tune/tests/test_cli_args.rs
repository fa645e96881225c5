//! CLI argument parsing tests for Tune

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn tune() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tune"))
}

#[test]
fn test_help_flag() {
    tune()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build Spotify playlists"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_version_flag() {
    tune()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_no_args_shows_usage() {
    tune()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_subcommand() {
    tune()
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_subcommands_listed() {
    tune()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("engage"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("threads"));
}

#[test]
fn test_engage_help() {
    tune()
        .args(["engage", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chat with the playlist agent"))
        .stdout(predicate::str::contains("-m, --message"))
        .stdout(predicate::str::contains("-t, --thread"))
        .stdout(predicate::str::contains("spotify_playlist_thread"));
}

#[test]
fn test_threads_help() {
    tune()
        .args(["threads", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn test_threads_show_requires_id() {
    tune()
        .args(["threads", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<ID>"));
}

#[test]
fn test_verbose_is_global() {
    tune()
        .args(["status", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-v, --verbose"));
}
