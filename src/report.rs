//! Reporting commands over the trace store: --whichdo, --sources,
//! --outputs, --howdid, --clean.  All thin reads over the core stores.

use crate::hash::Digest;
use crate::paths::RelPath;
use crate::repo::Repo;
use crate::rules;
use crate::store::{BlobStore, TraceStore};
use crate::trace::Trace;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

/// Print the dofile that would build each target.  Nonzero when any target
/// has none.
pub fn whichdo(repo: &Repo, targets: &[String]) -> anyhow::Result<i32> {
    let mut missing = false;
    for target in targets {
        let rel = repo.rel_from_arg(Path::new(target))?;
        match rules::find_rule(repo.root(), &rel) {
            Some(m) => println!("{}: {}", rel, m.dofile),
            None => {
                eprintln!("{}: no rule found", rel);
                missing = true;
            }
        }
    }
    Ok(if missing { 1 } else { 0 })
}

/// Every path ever recorded as a dependency, minus the targets themselves
/// and synthetic records.
pub fn sources(traces: &TraceStore) -> anyhow::Result<i32> {
    let all = traces.all()?;
    let outputs: HashSet<&RelPath> = all.iter().map(|(_, target, _)| target).collect();
    let mut seen = BTreeSet::new();
    for (_, _, trace) in &all {
        for dep in &trace.deps {
            if !dep.path.is_synthetic() && !outputs.contains(&dep.path) {
                seen.insert(dep.path.clone());
            }
        }
    }
    for path in seen {
        println!("{}", path);
    }
    Ok(0)
}

/// Every target with at least one committed trace.
pub fn outputs(traces: &TraceStore) -> anyhow::Result<i32> {
    let mut seen = BTreeSet::new();
    for (_, target, _) in traces.all()? {
        seen.insert(target);
    }
    for path in seen {
        println!("{}", path);
    }
    Ok(0)
}

/// Render how a target was produced: its newest trace, recursing into deps
/// that are themselves traced outputs.
pub fn howdid(repo: &Repo, traces: &TraceStore, targets: &[String]) -> anyhow::Result<i32> {
    // Newest trace per target, along with the rule that made it.
    let mut pairs = BTreeSet::new();
    for (rule, target, _) in traces.all()? {
        pairs.insert((rule, target));
    }
    let mut newest: HashMap<RelPath, (RelPath, Trace)> = HashMap::new();
    for (rule, target) in pairs {
        if newest.contains_key(&target) {
            continue;
        }
        if let Some(trace) = traces.candidates(&rule, &target)?.into_iter().next() {
            newest.insert(target, (rule, trace));
        }
    }
    let mut code = 0;
    for target in targets {
        let rel = repo.rel_from_arg(Path::new(target))?;
        match newest.get(&rel) {
            None => {
                eprintln!("{}: no build tree found", rel);
                code = 1;
            }
            Some(_) => {
                let mut on_path = HashSet::new();
                println!("{}", render(&rel, &newest, &mut on_path));
            }
        }
    }
    Ok(code)
}

fn render(
    target: &RelPath,
    newest: &HashMap<RelPath, (RelPath, Trace)>,
    on_path: &mut HashSet<RelPath>,
) -> termtree::Tree<String> {
    let Some((rule, trace)) = newest.get(target) else {
        return termtree::Tree::new(format!("{}", target));
    };
    let mut tree = termtree::Tree::new(format!(
        "{} @{:.8} <= {}",
        target,
        trace.output.to_hex(),
        rule
    ));
    if !on_path.insert(target.clone()) {
        tree.root.push_str(" (cycle)");
        return tree;
    }
    for dep in &trace.deps {
        if newest.contains_key(&dep.path) {
            tree.push(render(&dep.path, newest, on_path));
        } else {
            tree.push(termtree::Tree::new(format!(
                "{} @{:.8}",
                dep.path,
                dep.digest.to_hex()
            )));
        }
    }
    on_path.remove(target);
    tree
}

/// Remove every traced output file, after making sure its current contents
/// are in the content store.
pub fn clean(repo: &Repo, blobs: &BlobStore, traces: &TraceStore) -> anyhow::Result<i32> {
    let mut targets = BTreeSet::new();
    for (_, target, _) in traces.all()? {
        targets.insert(target);
    }
    for target in targets {
        let abs = repo.abs(&target);
        if !abs.is_file() {
            continue;
        }
        let digest = Digest::of_file(&abs)?;
        blobs.insert_from(&digest, &abs)?;
        std::fs::remove_file(&abs)?;
        println!(
            "{}: removed (contents remain at {})",
            target,
            blobs.path_for(&digest).display()
        );
    }
    Ok(0)
}
