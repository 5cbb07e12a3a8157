use crate::*;

/// The diamond D -> {B, C} -> A completes under -j2 without deadlock: a
/// rule awaiting a sub-build gives its parallelism token back.
#[test]
fn diamond_under_j2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", "echo A > \"$3\"\n")?;
    space.write_rule("b.do", "\"$REDUX\" a\nsleep 1\ncat a > \"$3\"\n")?;
    space.write_rule("c.do", "\"$REDUX\" a\nsleep 1\ncat a > \"$3\"\n")?;
    space.write_rule(
        "d.do",
        "\"$REDUX\" b &\n\"$REDUX\" c &\nwait\ncat b c > \"$3\"\n",
    )?;
    space.run_expect(&mut redux_command(vec!["-j", "2", "d"]))?;
    assert_eq!(space.read("d")?, b"A\nA\n");
    assert_eq!(space.read("b")?, b"A\n");
    assert_eq!(space.read("c")?, b"A\n");
    Ok(())
}

/// A volatile target demanded by two dependents in one build runs exactly
/// once; both dependents see the same digest.
#[test]
fn volatile_target_shared_within_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule(
        "v.do",
        &counted_rule("v.count", "\"$REDUX\" --always\necho volatile > \"$3\"\n"),
    )?;
    space.write_rule("d1.do", "\"$REDUX\" v\ncat v > \"$3\"\n")?;
    space.write_rule("d2.do", "\"$REDUX\" v\ncat v > \"$3\"\n")?;
    space.run_expect(&mut redux_command(vec!["-j", "4", "d1", "d2"]))?;
    assert_eq!(space.counter("v.count"), 1);
    assert_eq!(space.read("d1")?, space.read("d2")?);

    // volatile-always means the next build runs it again.
    space.run_expect(&mut redux_command(vec!["v"]))?;
    assert_eq!(space.counter("v.count"), 2);
    Ok(())
}

/// Repeated wants of one target inside a single build trigger at most one
/// rule execution.
#[test]
fn want_is_idempotent_within_a_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("x.do", &counted_rule("x.count", "echo X > \"$3\"\n"))?;
    space.write_rule(
        "top.do",
        "\"$REDUX\" x\n\"$REDUX\" x\n\"$REDUX\" x\ncat x > \"$3\"\n",
    )?;
    space.run_expect(&mut redux_command(vec!["top"]))?;
    assert_eq!(space.counter("x.count"), 1);
    Ok(())
}
