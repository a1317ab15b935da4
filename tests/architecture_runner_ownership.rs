use std::fs;
use std::path::{Path, PathBuf};

const AGENT_DRIVERS: &[(&str, &[&str])] = &[
    (".train_step(", &["src/orchestrator/runner.rs"]),
    (".save_checkpoint(", &["src/agents/checkpoint.rs"]),
];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

/// Source lines before the unit-test module
fn non_test_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
}

#[test]
fn agents_are_only_driven_by_runner_and_checkpoint_store() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);

    let mut offenders = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in non_test_lines(&content) {
            let trimmed = line.trim();
            for (call, allowed) in AGENT_DRIVERS {
                if trimmed.contains(call) && !allowed.iter().any(|a| *a == rel) {
                    offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
                }
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "agent driven outside its runner:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn slot_lock_is_never_held_across_await() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let slot = fs::read_to_string(repo_root.join("src/orchestrator/slot.rs")).unwrap();

    let offenders: Vec<_> = non_test_lines(&slot)
        .filter(|(_, line)| line.contains(".await") || line.contains("async fn"))
        .map(|(idx, line)| format!("src/orchestrator/slot.rs:{}: {}", idx + 1, line.trim()))
        .collect();

    assert!(
        offenders.is_empty(),
        "slot control must stay synchronous:\n{}",
        offenders.join("\n")
    );
}
