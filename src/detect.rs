use std::path::PathBuf;

use thiserror::Error;

use crate::registry::{LanguageProfile, ToolchainRegistry};
use crate::submission::Submission;

/// Why no language could be selected for a submission.
///
/// Detection failures are not student-code failures in the grading sense:
/// the execution sub-score becomes zero but documentation and static scores
/// still count.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("no recognizable source language in submission")]
    Unsupported,
    #[error("submission is ambiguous between {0} and {1}")]
    Ambiguous(String, String),
}

/// The selected language plus the entry file the pipeline will build and run.
#[derive(Debug, Clone)]
pub struct Detection {
    pub profile: LanguageProfile,
    pub entry: PathBuf,
}

/// Selects the dominant language of a submission.
///
/// Policy: the language matching the most source files wins. On a tie, the
/// tied language with a recognizable entry-point file name wins; if none or
/// several of them have one, the submission is ambiguous.
pub fn detect(
    submission: &Submission,
    registry: &ToolchainRegistry,
) -> Result<Detection, DetectionError> {
    // Tally matching files per profile, preserving registry order.
    let mut counts: Vec<(usize, usize)> = Vec::new(); // (profile index, file count)
    for (idx, profile) in registry.profiles().iter().enumerate() {
        let count = submission
            .files
            .iter()
            .filter(|f| {
                f.path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| profile.matches_extension(e))
            })
            .count();
        if count > 0 {
            counts.push((idx, count));
        }
    }

    let Some(&(_, best)) = counts.iter().max_by_key(|(_, c)| *c) else {
        return Err(DetectionError::Unsupported);
    };
    let tied: Vec<usize> = counts
        .iter()
        .filter(|(_, c)| *c == best)
        .map(|(idx, _)| *idx)
        .collect();

    let profiles = registry.profiles();
    let winner = if tied.len() == 1 {
        tied[0]
    } else {
        let with_entry: Vec<usize> = tied
            .iter()
            .copied()
            .filter(|&idx| entry_file(submission, &profiles[idx]).is_some())
            .collect();
        match with_entry.as_slice() {
            [only] => *only,
            // Name the actual contenders: the entry-point carriers when
            // several have one, the whole tie when none does.
            [first, second, ..] => {
                return Err(DetectionError::Ambiguous(
                    profiles[*first].name.clone(),
                    profiles[*second].name.clone(),
                ));
            }
            [] => {
                return Err(DetectionError::Ambiguous(
                    profiles[tied[0]].name.clone(),
                    profiles[tied[1]].name.clone(),
                ));
            }
        }
    };

    let profile = profiles[winner].clone();
    let entry = select_entry(submission, &profile);
    Ok(Detection { profile, entry })
}

/// Language name for a single file, used for per-file tagging in reports.
pub fn file_language(registry: &ToolchainRegistry, path: &std::path::Path) -> Option<String> {
    registry.resolve_path(path).map(|p| p.name.clone())
}

/// The file carrying the profile's conventional entry-point name, if any.
fn entry_file(submission: &Submission, profile: &LanguageProfile) -> Option<PathBuf> {
    submission
        .files
        .iter()
        .find(|f| {
            f.path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| profile.is_entry_name(n))
        })
        .map(|f| f.path.clone())
}

/// Entry file for the winning language: the conventional name if present,
/// else the first matching file in submission order.
fn select_entry(submission: &Submission, profile: &LanguageProfile) -> PathBuf {
    if let Some(entry) = entry_file(submission, profile) {
        return entry;
    }
    submission
        .files
        .iter()
        .find(|f| {
            f.path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| profile.matches_extension(e))
        })
        .map(|f| f.path.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::SourceFile;
    use pretty_assertions::assert_eq;

    fn submission(files: &[&str]) -> Submission {
        Submission::new(
            "test",
            files
                .iter()
                .map(|p| SourceFile {
                    path: PathBuf::from(p),
                    content: Vec::new(),
                })
                .collect(),
        )
    }

    #[test]
    fn majority_language_wins() {
        let registry = ToolchainRegistry::with_defaults();
        let sub = submission(&["a.py", "b.py", "notes.c"]);
        let detection = detect(&sub, &registry).unwrap();
        assert_eq!(detection.profile.name, "Python");
        assert_eq!(detection.entry, PathBuf::from("a.py"));
    }

    #[test]
    fn entry_name_breaks_ties() {
        let registry = ToolchainRegistry::with_defaults();
        let sub = submission(&["util.py", "main.c"]);
        let detection = detect(&sub, &registry).unwrap();
        assert_eq!(detection.profile.name, "C");
        assert_eq!(detection.entry, PathBuf::from("main.c"));
    }

    #[test]
    fn tie_without_entry_point_is_ambiguous() {
        let registry = ToolchainRegistry::with_defaults();
        let sub = submission(&["util.py", "helper.c"]);
        assert!(matches!(
            detect(&sub, &registry),
            Err(DetectionError::Ambiguous(_, _))
        ));
    }

    #[test]
    fn tie_with_two_entry_points_is_ambiguous() {
        let registry = ToolchainRegistry::with_defaults();
        let sub = submission(&["main.py", "main.c"]);
        assert!(matches!(
            detect(&sub, &registry),
            Err(DetectionError::Ambiguous(_, _))
        ));
    }

    #[test]
    fn ambiguity_error_names_the_entry_point_carriers() {
        let registry = ToolchainRegistry::with_defaults();
        // Three-way tie; only C and Python carry entry-point names, so the
        // diagnostic must name those two, not the JavaScript bystander.
        let sub = submission(&["util.js", "main.c", "main.py"]);
        match detect(&sub, &registry) {
            Err(DetectionError::Ambiguous(a, b)) => {
                assert_eq!(a, "C");
                assert_eq!(b, "Python");
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        let registry = ToolchainRegistry::with_defaults();
        let sub = submission(&["README.md", "design.txt"]);
        assert!(matches!(
            detect(&sub, &registry),
            Err(DetectionError::Unsupported)
        ));
        let empty = submission(&[]);
        assert!(matches!(
            detect(&empty, &registry),
            Err(DetectionError::Unsupported)
        ));
    }

    #[test]
    fn entry_prefers_conventional_name_over_order() {
        let registry = ToolchainRegistry::with_defaults();
        let sub = submission(&["alpha.java", "Main.java", "zeta.java"]);
        let detection = detect(&sub, &registry).unwrap();
        assert_eq!(detection.profile.name, "Java");
        assert_eq!(detection.entry, PathBuf::from("Main.java"));
    }

    #[test]
    fn nested_entry_file_is_found() {
        let registry = ToolchainRegistry::with_defaults();
        let sub = submission(&["src/lib.js", "src/main.js"]);
        let detection = detect(&sub, &registry).unwrap();
        assert_eq!(detection.entry, PathBuf::from("src/main.js"));
    }
}
