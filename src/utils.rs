use std::fs::read_to_string;
use std::path::{Path, PathBuf};

/// Deduces the domain file next to an instance file via the usual naming
/// conventions; first hit wins.
pub fn find_domain_filename(instance: &Path) -> Option<PathBuf> {
    let dir = instance.parent().unwrap_or_else(|| Path::new(""));
    let base = instance.file_name()?.to_string_lossy();
    let prefix: String = base.chars().take(3).collect();

    [
        "domain.pddl".to_owned(),
        format!("{prefix}-domain.pddl"),
        format!("domain_{base}"),
        format!("domain-{base}"),
    ]
    .iter()
    .map(|name| dir.join(name))
    .find(|candidate| candidate.is_file())
}

// auxiliary and built-in predicates do not count as instance atoms
pub fn count_instance_atoms(model: &Path) -> std::io::Result<usize> {
    Ok(read_to_string(model)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.contains("__x") && !line.contains("equals("))
        .count())
}

pub fn silent_remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}
