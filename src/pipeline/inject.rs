//! Variable injection into pipeline text.
//!
//! Placeholders use the `$$NAME` form. Injection is pure text substitution:
//! unknown placeholders pass through unchanged and an empty mapping leaves
//! the text byte-for-byte identical.
//!
//! Two modes exist. Full mode substitutes anywhere in the text. Safe mode
//! parses the document and substitutes only in scalar positions outside the
//! executable keys (`command`, `commands`, `entrypoint`), so an untrusted
//! pipeline author cannot route a secret into a logged command line.

use super::errors::Error;

/// Keys whose subtrees never receive safe-mode substitution.
const EXECUTABLE_KEYS: &[&str] = &["command", "commands", "entrypoint"];

/// Substitutes `$$NAME` placeholders anywhere in the text.
///
/// Longer names are substituted first so `$$BRANCH` never matches inside
/// `$$BRANCH_NAME`.
#[must_use]
pub fn inject(text: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return text.to_string();
    }
    let mut ordered: Vec<&(String, String)> = params.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = text.to_string();
    for (key, value) in ordered {
        if key.is_empty() {
            continue;
        }
        out = out.replace(&format!("$${key}"), value);
    }
    out
}

/// Substitutes placeholders only in non-executable scalar positions.
///
/// The document is parsed, substituted and re-serialized, so formatting is
/// normalized as a side effect.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the text is not valid YAML. Callers that
/// prefer to drop injection over failing the build may ignore the error
/// and keep the original text.
pub fn inject_safe(text: &str, params: &[(String, String)]) -> Result<String, Error> {
    if params.is_empty() {
        return Ok(text.to_string());
    }
    let mut doc: serde_yaml::Value = serde_yaml::from_str(text).map_err(Error::parse)?;
    substitute(&mut doc, params, true);
    serde_yaml::to_string(&doc).map_err(Error::parse)
}

fn substitute(value: &mut serde_yaml::Value, params: &[(String, String)], allow: bool) {
    match value {
        serde_yaml::Value::String(s) => {
            if allow {
                *s = inject(s, params);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                substitute(item, params, allow);
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (key, item) in map.iter_mut() {
                let child_allow = allow
                    && !key
                        .as_str()
                        .is_some_and(|k| EXECUTABLE_KEYS.contains(&k));
                substitute(item, params, child_allow);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_inject_substitutes() {
        let out = inject("image: repo/$$BRANCH", &params(&[("BRANCH", "master")]));
        assert_eq!(out, "image: repo/master");
    }

    #[test]
    fn test_inject_longest_name_first() {
        let out = inject(
            "a: $$BRANCH_NAME b: $$BRANCH",
            &params(&[("BRANCH", "m"), ("BRANCH_NAME", "main")]),
        );
        assert_eq!(out, "a: main b: m");
    }

    #[test]
    fn test_inject_unknown_placeholder_passes_through() {
        let out = inject("token: $$UNKNOWN", &params(&[("BRANCH", "master")]));
        assert_eq!(out, "token: $$UNKNOWN");
    }

    #[test]
    fn test_inject_empty_mapping_is_identity() {
        let text = "build:\n  image: golang\n  commands:\n    - echo $$SECRET\n";
        assert_eq!(inject(text, &[]), text);
    }

    #[test]
    fn test_inject_safe_skips_commands() {
        let text = "build:\n  image: golang\n  commands:\n    - echo $$TOKEN\nnotify:\n  slack:\n    token: $$TOKEN\n";
        let out = inject_safe(text, &params(&[("TOKEN", "s3cr3t")])).unwrap();
        assert!(out.contains("echo $$TOKEN"), "command position must not be injected: {out}");
        assert!(out.contains("token: s3cr3t"), "safe position must be injected: {out}");
    }

    #[test]
    fn test_inject_safe_skips_entrypoint() {
        let text = "build:\n  image: golang\n  entrypoint: $$TOKEN\n";
        let out = inject_safe(text, &params(&[("TOKEN", "s3cr3t")])).unwrap();
        assert!(!out.contains("s3cr3t"));
    }

    #[test]
    fn test_inject_safe_invalid_yaml_errors() {
        let err = inject_safe(": not yaml [", &params(&[("A", "b")]));
        assert!(err.is_err());
    }
}
