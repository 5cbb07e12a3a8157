use crate::*;

#[test]
fn no_targets_is_an_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut redux_command(vec![]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "no targets");
    Ok(())
}

#[test]
fn clean_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", "echo hello > \"$3\"\n")?;
    space.run_expect(&mut redux_command(vec!["a"]))?;

    assert_eq!(space.read("a")?, b"hello\n");
    // One blob and one trace landed in the metadata area.
    let blobs = space.path().join(".git/redux/blobs");
    assert!(std::fs::read_dir(&blobs)?.next().is_some());
    let traces = space.path().join(".git/redux/traces");
    assert!(std::fs::read_dir(&traces)?.next().is_some());
    Ok(())
}

#[test]
fn second_build_spawns_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", &counted_rule("a.count", "echo hello > \"$3\"\n"))?;
    space.run_expect(&mut redux_command(vec!["a"]))?;
    assert_eq!(space.counter("a.count"), 1);

    space.run_expect(&mut redux_command(vec!["a"]))?;
    assert_eq!(space.counter("a.count"), 1);
    assert_eq!(space.read("a")?, b"hello\n");
    Ok(())
}

#[test]
fn missing_target_with_no_rule_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut redux_command(vec!["nothing"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "no rule");
    Ok(())
}

#[test]
fn failing_rule_leaves_nothing_behind() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", "echo partial > \"$3\"\nexit 3\n")?;
    let out = space.run(&mut redux_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "exit code 3");
    assert!(!space.exists("a"));
    assert!(!space.exists(".redux_a.tmp"));
    assert!(!space.exists(".redux_a.trace"));
    Ok(())
}

#[test]
fn default_rule_receives_basename() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("default.o.do", "printf '%s %s' \"$1\" \"$2\" > \"$3\"\n")?;
    space.run_expect(&mut redux_command(vec!["sub/foo.o"]))?;
    assert_eq!(space.read("sub/foo.o")?, b"sub/foo sub/foo.o");
    Ok(())
}

#[test]
fn existing_file_without_rule_is_a_source() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("data", "payload")?;
    // Wanting a plain file succeeds and does not touch it.
    space.run_expect(&mut redux_command(vec!["data"]))?;
    assert_eq!(space.read("data")?, b"payload");
    Ok(())
}

#[test]
fn cycle_is_rejected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", "\"$REDUX\" b\ncat b > \"$3\"\n")?;
    space.write_rule("b.do", "\"$REDUX\" a\ncat a > \"$3\"\n")?;
    let out = space.run(&mut redux_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "cycle");
    assert!(!space.exists("a"));
    assert!(!space.exists("b"));
    assert!(!space.exists(".redux_a.tmp"));
    assert!(!space.exists(".redux_b.tmp"));
    Ok(())
}

#[test]
fn sibling_failure_does_not_cancel_other_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("good.do", "echo ok > \"$3\"\n")?;
    space.write_rule("bad.do", "exit 1\n")?;
    let out = space.run(&mut redux_command(vec!["good", "bad"]))?;
    assert!(!out.status.success());
    assert_eq!(space.read("good")?, b"ok\n");
    Ok(())
}
