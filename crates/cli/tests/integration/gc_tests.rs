use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn dry_run_lists_unrooted_paths_only() {
  let env = TestEnv::empty();
  let kept = env.add("kept.txt", "kept", &[], Some("kept"));
  let garbage = env.add("garbage.txt", "garbage", &[], None);

  env
    .storegc_cmd()
    .args(["gc", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains(garbage.as_str()))
    .stdout(predicate::str::contains(kept.as_str()).not());

  assert!(env.object_exists(&garbage));
}

#[test]
fn print_live_includes_root_closure() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let app = env.add("app.txt", "app", &[&lib], Some("app"));
  let stray = env.add("stray.txt", "stray", &[], None);

  env
    .storegc_cmd()
    .args(["gc", "--print-live"])
    .assert()
    .success()
    .stdout(predicate::str::contains(app.as_str()))
    .stdout(predicate::str::contains(lib.as_str()))
    .stdout(predicate::str::contains(stray.as_str()).not());
}

#[test]
fn gc_deletes_dead_paths_and_keeps_live_ones() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let app = env.add("app.txt", "app", &[&lib], Some("app"));
  let garbage = env.add("garbage.txt", "garbage", &[], None);

  env
    .storegc_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Paths deleted: 1"));

  assert!(!env.object_exists(&garbage));
  assert!(env.object_exists(&app));
  assert!(env.object_exists(&lib));

  env
    .storegc_cmd()
    .args(["path-info", &garbage])
    .assert()
    .failure()
    .stderr(predicate::str::contains("is not valid"));
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::empty();
  let garbage = env.add("garbage.txt", "garbage", &[], None);

  let out = env
    .storegc_cmd()
    .args(["-o", "json", "gc"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
  assert_eq!(value["action"], "delete_dead");
  assert_eq!(value["paths"], serde_json::json!([garbage]));
  assert!(value["bytes_freed"].as_u64().unwrap() > 0);
}

#[test]
fn delete_refuses_live_paths() {
  let env = TestEnv::empty();
  let kept = env.add("kept.txt", "kept", &[], Some("kept"));

  env
    .storegc_cmd()
    .args(["delete", "--force", &kept])
    .assert()
    .failure()
    .stderr(predicate::str::contains("reachable from a GC root"));

  assert!(env.object_exists(&kept));
}

#[test]
fn delete_refuses_paths_referenced_by_survivors() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let _app = env.add("app.txt", "app", &[&lib], None);

  env
    .storegc_cmd()
    .args(["delete", "--force", &lib])
    .assert()
    .failure()
    .stderr(predicate::str::contains("✗").and(predicate::str::contains("referenced by")));

  assert!(env.object_exists(&lib));
}

#[test]
fn delete_removes_a_dead_closure() {
  let env = TestEnv::empty();
  let lib = env.add("lib.txt", "lib", &[], None);
  let app = env.add("app.txt", "app", &[&lib], None);

  env
    .storegc_cmd()
    .args(["delete", "--force", &lib, &app])
    .assert()
    .success()
    .stdout(predicate::str::contains("deleted"));

  assert!(!env.object_exists(&lib));
  assert!(!env.object_exists(&app));
}

#[test]
fn delete_without_force_needs_a_terminal() {
  let env = TestEnv::empty();
  let garbage = env.add("garbage.txt", "garbage", &[], None);

  env
    .storegc_cmd()
    .args(["delete", &garbage])
    .assert()
    .failure()
    .stderr(predicate::str::contains("non-interactive"));

  assert!(env.object_exists(&garbage));
}

#[test]
fn heuristic_dry_run_selects_without_deleting() {
  let env = TestEnv::empty();
  let garbage = env.add("garbage.txt", "some garbage contents", &[], None);

  env
    .storegc_cmd()
    .args(["heuristic", "1", "--dry-run", "-t", "0"])
    .assert()
    .success()
    .stdout(predicate::str::contains(garbage.as_str()))
    .stdout(predicate::str::contains("Dry run"));

  assert!(env.object_exists(&garbage));
}

#[test]
fn heuristic_deletes_up_to_the_limit() {
  let env = TestEnv::empty();
  let garbage = env.add("garbage.txt", "some garbage contents", &[], None);
  let kept = env.add("kept.txt", "kept", &[], Some("kept"));

  env
    .storegc_cmd()
    .args(["heuristic", "1G", "-t", "0"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Heuristic collection complete"));

  assert!(!env.object_exists(&garbage));
  assert!(env.object_exists(&kept));
}
