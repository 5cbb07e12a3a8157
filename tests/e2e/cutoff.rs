use crate::*;
use std::time::{Duration, Instant};

/// The canonical mid-job cutoff: a rule whose probed prefix matches a
/// committed trace is killed before its slow remainder runs, and the target
/// comes back from cache.
#[test]
fn mid_job_cutoff() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", "echo A > \"$3\"\n")?;
    space.write_rule(
        "b.do",
        &counted_rule("b.count", "\"$REDUX\" a\ncat a > \"$3\"\n"),
    )?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert_eq!(space.counter("b.count"), 1);

    // Same probes, same output, but a slow tail.  The edit forces the rule
    // to start; the probe for `a` proves the old trace and kills it.
    space.write_rule(
        "b.do",
        &counted_rule("b.count", "\"$REDUX\" a\nsleep 30\ncat a > \"$3\"\n"),
    )?;
    let started = Instant::now();
    space.run_expect(&mut redux_command(vec!["b"]))?;
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(20),
        "expected cutoff well before the sleep finished, took {:?}",
        elapsed
    );
    assert_eq!(space.counter("b.count"), 2);
    assert_eq!(space.read("b")?, b"A\n");
    Ok(())
}

/// A killed job leaves the tree exactly as it was: no temp output, no
/// working tracefile.
#[test]
fn cutoff_cleans_up_temps() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule("a.do", "echo A > \"$3\"\n")?;
    space.write_rule("b.do", "\"$REDUX\" a\ncat a > \"$3\"\n")?;
    space.run_expect(&mut redux_command(vec!["b"]))?;

    space.write_rule("b.do", "\"$REDUX\" a\nsleep 30\ncat a > \"$3\"\n")?;
    space.run_expect(&mut redux_command(vec!["b"]))?;
    assert!(!space.exists(".redux_b.tmp"));
    assert!(!space.exists(".redux_b.trace"));
    assert_eq!(space.read("b")?, b"A\n");
    Ok(())
}

/// --stamp makes the trace volatile (the rule is re-attempted every build)
/// but identical stamped bytes still prove a cutoff.
#[test]
fn stamp_reattempts_with_cutoff() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_rule(
        "fetch.do",
        &counted_rule(
            "fetch.count",
            "printf 'payload' | \"$REDUX\" --stamp\necho out > \"$3\"\n",
        ),
    )?;
    space.run_expect(&mut redux_command(vec!["fetch"]))?;
    assert_eq!(space.counter("fetch.count"), 1);

    // Volatile: the rule is spawned again, but the stamp matches and the
    // run is cut off before the slow tail.
    space.write_rule(
        "fetch.do",
        &counted_rule(
            "fetch.count",
            "printf 'payload' | \"$REDUX\" --stamp\nsleep 30\necho never > \"$3\"\n",
        ),
    )?;
    let started = Instant::now();
    space.run_expect(&mut redux_command(vec!["fetch"]))?;
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(space.counter("fetch.count"), 2);
    assert_eq!(space.read("fetch")?, b"out\n");

    // Different stamped bytes: no proof, the rule runs to completion.
    space.write_rule(
        "fetch.do",
        &counted_rule(
            "fetch.count",
            "printf 'changed' | \"$REDUX\" --stamp\necho out2 > \"$3\"\n",
        ),
    )?;
    space.run_expect(&mut redux_command(vec!["fetch"]))?;
    assert_eq!(space.read("fetch")?, b"out2\n");
    Ok(())
}
