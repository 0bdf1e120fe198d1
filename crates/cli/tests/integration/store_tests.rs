use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn add_is_idempotent() {
  let env = TestEnv::empty();
  let first = env.add("hello.txt", "hello", &[], None);
  let second = env.add("hello.txt", "hello", &[], None);
  assert_eq!(first, second);
  assert!(first.ends_with("-hello.txt"));
}

#[test]
fn add_rejects_unknown_references() {
  let env = TestEnv::empty();
  let file = env.write_file("inputs/app.txt", "app");

  env
    .storegc_cmd()
    .arg("add")
    .arg("app.txt")
    .arg(&file)
    .args(["--reference", "00000000000000000000000000000000-missing"])
    .assert()
    .failure();
}

#[test]
fn add_reads_stdin_without_a_file() {
  let env = TestEnv::empty();

  env
    .storegc_cmd()
    .args(["add", "piped.txt"])
    .write_stdin("from stdin")
    .assert()
    .success()
    .stdout(predicate::str::contains("-piped.txt"));
}

#[test]
fn path_info_shows_references_and_size() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let app = env.add("app.txt", "application", &[&lib], None);

  env
    .storegc_cmd()
    .args(["path-info", &app])
    .assert()
    .success()
    .stdout(predicate::str::contains("NAR size: 11 B"))
    .stdout(predicate::str::contains(lib.as_str()));
}

#[test]
fn path_info_accepts_absolute_paths() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let absolute = env.store_dir().join(&lib);

  env
    .storegc_cmd()
    .arg("path-info")
    .arg(&absolute)
    .assert()
    .success()
    .stdout(predicate::str::contains(lib.as_str()));
}

#[test]
fn path_info_json_lists_every_path() {
  let env = TestEnv::empty();
  let a = env.add("a.txt", "a", &[], None);
  let b = env.add("b.txt", "b", &[&a], None);

  let out = env
    .storegc_cmd()
    .args(["-o", "json", "path-info", &a, &b])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let infos: serde_json::Value = serde_json::from_slice(&out).unwrap();
  assert_eq!(infos.as_array().unwrap().len(), 2);
  assert_eq!(infos[0]["path"], a.as_str());
  assert_eq!(infos[1]["references"], serde_json::json!([a]));
}

#[test]
fn referrers_and_references() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let app = env.add("app.txt", "app", &[&lib], None);

  env
    .storegc_cmd()
    .args(["referrers", &lib])
    .assert()
    .success()
    .stdout(predicate::str::contains(app.as_str()));

  env
    .storegc_cmd()
    .args(["referrers", "--references", &app])
    .assert()
    .success()
    .stdout(predicate::str::contains(lib.as_str()));
}

#[test]
fn topo_sort_puts_references_first() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let app = env.add("app.txt", "app", &[&lib], None);

  let out = env
    .storegc_cmd()
    .args(["topo-sort", &app, &lib])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let stdout = String::from_utf8(out).unwrap();
  let lines: Vec<&str> = stdout.lines().collect();
  assert_eq!(lines.len(), 2);
  assert!(lines[0].ends_with(lib.as_str()));
  assert!(lines[1].ends_with(app.as_str()));
}

#[test]
fn derivation_outputs_are_listed() {
  let env = TestEnv::empty();
  let file = env.write_file("inputs/hello.drv", "derive hello");

  let out = env
    .storegc_cmd()
    .args(["-o", "json", "add", "hello.drv"])
    .arg(&file)
    .args(["--drv-output", "out", "--drv-output", "dev"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();
  let added: serde_json::Value = serde_json::from_slice(&out).unwrap();
  let drv = added["path"].as_str().unwrap().to_string();
  assert!(added["outputs"]["out"].as_str().unwrap().ends_with("-hello"));
  assert!(added["outputs"]["dev"].as_str().unwrap().ends_with("-hello-dev"));

  env
    .storegc_cmd()
    .args(["outputs", &drv])
    .assert()
    .success()
    .stdout(predicate::str::contains("out"))
    .stdout(predicate::str::contains("-hello-dev"));
}

#[test]
fn outputs_of_a_plain_path_fail() {
  let env = TestEnv::empty();
  let plain = env.add("plain.txt", "plain", &[], None);

  env
    .storegc_cmd()
    .args(["outputs", &plain])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not a derivation"));
}

#[test]
fn drv_output_requires_a_derivation_name() {
  let env = TestEnv::empty();
  let file = env.write_file("inputs/plain.txt", "plain");

  env
    .storegc_cmd()
    .args(["add", "plain.txt"])
    .arg(&file)
    .args(["--drv-output", "dev"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--drv-output"));
}

#[test]
fn roots_lists_registered_roots() {
  let env = TestEnv::empty();
  let kept = env.add("kept.txt", "kept", &[], Some("kept"));
  let _other = env.add("other.txt", "other", &[], None);

  env
    .storegc_cmd()
    .arg("roots")
    .assert()
    .success()
    .stdout(predicate::str::contains(kept.as_str()))
    .stdout(predicate::str::contains("other.txt").not());

  assert!(env.state_dir().join("gcroots").join("kept").exists());
}
