use crate::*;

/// --after keeps the cached result inside the validity window.
#[test]
fn after_window_caches() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule(
        "now.do",
        &counted_rule("now.count", "\"$REDUX\" --after 1h\ndate +%s%N > \"$3\"\n"),
    )?;
    space.run_expect(&mut redux_command(vec!["now"]))?;
    let first = space.read("now")?;
    space.run_expect(&mut redux_command(vec!["now"]))?;
    assert_eq!(space.counter("now.count"), 1);
    assert_eq!(space.read("now")?, first);
    Ok(())
}

/// --always invalidates on every build.
#[test]
fn always_rebuilds_every_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule(
        "v.do",
        &counted_rule("v.count", "\"$REDUX\" --always\necho v > \"$3\"\n"),
    )?;
    space.run_expect(&mut redux_command(vec!["v"]))?;
    space.run_expect(&mut redux_command(vec!["v"]))?;
    assert_eq!(space.counter("v.count"), 2);
    Ok(())
}

/// --depfile records every listed dependency.
#[test]
fn depfile_dependencies() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("x.h", "x1")?;
    space.write("y.h", "y1")?;
    space.write_rule(
        "c.do",
        &counted_rule(
            "c.count",
            "printf 'c: x.h y.h\\n' > c.d\n\"$REDUX\" --depfile c.d\ncat x.h y.h > \"$3\"\n",
        ),
    )?;
    space.run_expect(&mut redux_command(vec!["c"]))?;
    assert_eq!(space.counter("c.count"), 1);
    assert_eq!(space.read("c")?, b"x1y1");

    // Untouched: cache hit.
    space.run_expect(&mut redux_command(vec!["c"]))?;
    assert_eq!(space.counter("c.count"), 1);

    // Touch one recorded dep: rebuild.
    space.write("x.h", "x2")?;
    space.run_expect(&mut redux_command(vec!["c"]))?;
    assert_eq!(space.counter("c.count"), 2);
    assert_eq!(space.read("c")?, b"x2y1");
    Ok(())
}

/// Probing a dependency builds it recursively and records its digest.
#[test]
fn probe_builds_recursively() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("base", "1")?;
    space.write_rule("mid.do", "\"$REDUX\" base\ncat base base > \"$3\"\n")?;
    space.write_rule("top.do", "\"$REDUX\" mid\ncat mid mid > \"$3\"\n")?;
    space.run_expect(&mut redux_command(vec!["top"]))?;
    assert_eq!(space.read("top")?, b"1111");

    space.write("base", "2")?;
    space.run_expect(&mut redux_command(vec!["top"]))?;
    assert_eq!(space.read("top")?, b"2222");
    Ok(())
}

/// The child-only flags refuse to run outside a rule.
#[test]
fn child_flags_rejected_at_top_level() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut redux_command(vec!["--always"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "inside a running rule");
    Ok(())
}
