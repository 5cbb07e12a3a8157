use crate::*;

const RULE_V1: &str = "echo hello > \"$3\"\n";
const RULE_V2: &str = "echo world > \"$3\"\n";

/// Switching back to previously-built state restores the old output from
/// cache without spawning the rule.
#[test]
fn cache_reuse_across_rule_versions() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", &counted_rule("a.count", RULE_V1))?;
    space.run_expect(&mut redux_command(vec!["a"]))?;
    assert_eq!(space.read("a")?, b"hello\n");
    assert_eq!(space.counter("a.count"), 1);

    space.write_rule("a.do", &counted_rule("a.count", RULE_V2))?;
    space.run_expect(&mut redux_command(vec!["a"]))?;
    assert_eq!(space.read("a")?, b"world\n");
    assert_eq!(space.counter("a.count"), 2);

    // Back to v1, byte for byte: the first trace validates again.
    space.write_rule("a.do", &counted_rule("a.count", RULE_V1))?;
    space.run_expect(&mut redux_command(vec!["a"]))?;
    assert_eq!(space.read("a")?, b"hello\n");
    assert_eq!(space.counter("a.count"), 2);
    Ok(())
}

/// An upstream rule change that produces identical bytes does not ripple
/// into dependents.
#[test]
fn early_cutoff() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", &counted_rule("a.count", "echo X > \"$3\"\n"))?;
    space.write_rule(
        "b.do",
        &counted_rule("b.count", "\"$REDUX\" a\ncat a > \"$3\"\n"),
    )?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert_eq!(space.counter("a.count"), 1);
    assert_eq!(space.counter("b.count"), 1);

    // A different dofile with the same output bytes.
    space.write_rule(
        "a.do",
        &counted_rule("a.count", "# tweaked\necho X > \"$3\"\n"),
    )?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    // a's rule ran again, but its digest did not change, so b cache-hit.
    assert_eq!(space.counter("a.count"), 2);
    assert_eq!(space.counter("b.count"), 1);
    assert_eq!(space.read("b")?, b"X\n");
    Ok(())
}

/// Reading a file without probing it is not recorded; the stale cached
/// output comes back.  Documented hazard.
#[test]
fn undeclared_dependency_hazard() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a", "old\n")?;
    space.write_rule("b.do", &counted_rule("b.count", "cat a > \"$3\"\n"))?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert_eq!(space.read("b")?, b"old\n");

    space.write("a", "new\n")?;
    space.remove("b")?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert_eq!(space.read("b")?, b"old\n");
    assert_eq!(space.counter("b.count"), 1);
    Ok(())
}

#[test]
fn force_reruns_the_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", &counted_rule("a.count", "echo hi > \"$3\"\n"))?;
    space.run_expect(&mut redux_command(vec!["a"]))?;
    space.run_expect(&mut redux_command(vec!["--force", "a"]))?;
    assert_eq!(space.counter("a.count"), 2);
    Ok(())
}

/// A tracked-but-absent file records an observed non-existence; creating it
/// invalidates the trace.
#[test]
fn observed_missing_dependency() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("cfg", "x")?;
    let added = std::process::Command::new("git")
        .args(["add", "cfg"])
        .current_dir(space.path())
        .status()?
        .success();
    anyhow::ensure!(added, "git add failed");
    space.remove("cfg")?;

    space.write_rule(
        "b.do",
        &counted_rule("b.count", "\"$REDUX\" cfg\necho built > \"$3\"\n"),
    )?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert_eq!(space.counter("b.count"), 1);

    // Still missing: cache hit.
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert_eq!(space.counter("b.count"), 1);

    // Now it exists: the dep record no longer matches.
    space.write("cfg", "present")?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert_eq!(space.counter("b.count"), 2);
    Ok(())
}

/// Deleting an output does not invalidate its trace; it is restored from
/// the content store.
#[test]
fn deleted_output_is_restored_from_cache() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", &counted_rule("a.count", "echo hello > \"$3\"\n"))?;
    space.run_expect(&mut redux_command(vec!["a"]))?;
    space.remove("a")?;
    space.run_expect(&mut redux_command(vec!["a"]))?;
    assert_eq!(space.read("a")?, b"hello\n");
    assert_eq!(space.counter("a.count"), 1);
    Ok(())
}
