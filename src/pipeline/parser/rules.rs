//! The policy rule chain.
//!
//! Each rule is a pure transform from a leaf to a leaf (or a parse
//! failure), applied in a fixed, explicitly ordered sequence to every leaf
//! in the tree. Policy constants live in [`RuleConfig`], constructed by
//! the orchestrator; there is no global rule registration.

use crate::pipeline::errors::Error;

use super::tree::{Phase, StepNode};

/// Policy configuration for the rule chain.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Clone plugin injected when the document has no clone section.
    pub default_cloner: String,
    /// Cache plugin injected when the document has no cache section.
    pub default_cacher: String,
    /// First-party images granted privileged mode.
    pub escalate_images: Vec<String>,
    /// Images exempt from sanitization on untrusted repositories.
    pub trusted_images: Vec<String>,
    /// Registry namespace for short plugin names.
    pub plugin_namespace: String,
    /// Image-name prefix for short plugin names.
    pub plugin_prefix: String,
    /// Host directory under which per-repository caches live.
    pub cache_root: String,
    /// Proxy variables copied from the host environment into every leaf.
    pub proxy_keys: Vec<String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            default_cloner: "plugins/drone-git".to_string(),
            default_cacher: "plugins/drone-cache".to_string(),
            escalate_images: vec![
                "plugins/drone-docker".to_string(),
                "plugins/drone-gcr".to_string(),
            ],
            trusted_images: vec!["plugins/*".to_string()],
            plugin_namespace: "plugins".to_string(),
            plugin_prefix: "drone-".to_string(),
            cache_root: "/var/lib/gantry/cache".to_string(),
            proxy_keys: vec![
                "HTTP_PROXY".to_string(),
                "HTTPS_PROXY".to_string(),
                "NO_PROXY".to_string(),
            ],
        }
    }
}

/// Per-build inputs to the rule chain.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    /// The repository keeps privileged/volume/entrypoint overrides.
    pub trusted_repo: bool,
    /// Force-pull plugin images.
    pub force_pull: bool,
    /// Repository owner/name, scoping the cache key.
    pub repo_full_name: String,
    /// Debug flag propagated into leaf environments.
    pub debug: bool,
    /// Host path mounted over the workspace, when requested.
    pub mount: Option<String>,
    /// Resolved in-container workspace path.
    pub workspace_path: String,
    /// Allowed plugin image patterns; empty falls back to the trusted set.
    pub plugin_patterns: Vec<String>,
}

/// A single rule in the chain.
pub type RuleFunc = Box<dyn Fn(StepNode) -> Result<StepNode, Error> + Send + Sync>;

/// Builds the fixed rule chain for one compilation.
///
/// Host proxy variables are read once here, keeping the individual rules
/// pure.
#[must_use]
pub fn default_rules(cfg: &RuleConfig, ctx: &RuleContext) -> Vec<RuleFunc> {
    let patterns = if ctx.plugin_patterns.is_empty() {
        cfg.trusted_images.clone()
    } else {
        ctx.plugin_patterns.clone()
    };
    let namespace = cfg.plugin_namespace.clone();
    let prefix = cfg.plugin_prefix.clone();
    let force = ctx.force_pull;
    let trusted_repo = ctx.trusted_repo;
    let trusted_images = cfg.trusted_images.clone();
    let full_name = ctx.repo_full_name.clone();
    let cache_root = cfg.cache_root.clone();
    let debug = ctx.debug;
    let escalate_images = cfg.escalate_images.clone();
    let proxy_env = proxy_environment(&cfg.proxy_keys);

    let mut rules: Vec<RuleFunc> = vec![
        Box::new(image_name),
        Box::new(move |step| image_match(step, &patterns, &namespace, &prefix)),
        Box::new(move |step| image_pull(step, force)),
        Box::new(move |step| sanitize(step, trusted_repo, &trusted_images)),
        Box::new(move |step| cache_key(step, &full_name, &cache_root)),
        Box::new(move |step| debug_env(step, debug)),
        Box::new(move |step| escalate(step, &escalate_images)),
        Box::new(move |step| http_proxy(step, &proxy_env)),
        Box::new(default_notify_filter),
    ];
    if let Some(host) = &ctx.mount {
        let host = host.clone();
        let workspace = ctx.workspace_path.clone();
        rules.push(Box::new(move |step| mount(step, &host, &workspace)));
    }
    rules
}

/// Validates and normalizes the image reference. Every step must name one.
pub fn image_name(mut step: StepNode) -> Result<StepNode, Error> {
    step.image = step.image.trim().to_string();
    if step.image.is_empty() {
        return Err(Error::Parse(format!(
            "the {} step must specify an image",
            step.name()
        )));
    }
    Ok(step)
}

/// Resolves short plugin names against the registry patterns.
///
/// Plugin leaves with a bare name expand into the configured namespace and
/// prefix; the result must match an allowed pattern.
pub fn image_match(
    mut step: StepNode,
    patterns: &[String],
    namespace: &str,
    prefix: &str,
) -> Result<StepNode, Error> {
    if !is_plugin(step.phase) {
        return Ok(step);
    }
    if !step.image.contains('/') {
        let name = step.image.split(':').next().unwrap_or_default();
        if name.starts_with(prefix) {
            step.image = format!("{namespace}/{}", step.image);
        } else {
            step.image = format!("{namespace}/{prefix}{}", step.image);
        }
    }
    let bare = step.image.split(':').next().unwrap_or_default();
    if !patterns.iter().any(|p| match_pattern(p, bare)) {
        return Err(Error::Parse(format!(
            "plugin {} is not an approved plugin image",
            step.image
        )));
    }
    Ok(step)
}

/// Applies the force-pull flag to plugin leaves.
pub fn image_pull(mut step: StepNode, force: bool) -> Result<StepNode, Error> {
    if force && is_plugin(step.phase) {
        step.pull = true;
    }
    Ok(step)
}

/// Strips caller-supplied privilege escalations on untrusted repositories.
///
/// Entrypoint, volume, privileged and network overrides are removed unless
/// the image is on the trusted-plugin allow-list.
pub fn sanitize(
    mut step: StepNode,
    trusted_repo: bool,
    trusted_images: &[String],
) -> Result<StepNode, Error> {
    if trusted_repo {
        return Ok(step);
    }
    let bare = step.image.split(':').next().unwrap_or_default();
    if trusted_images.iter().any(|p| match_pattern(p, bare)) {
        return Ok(step);
    }
    step.entrypoint.clear();
    step.volumes.clear();
    step.privileged = false;
    step.network_mode.clear();
    Ok(step)
}

/// Annotates cache leaves with a repository-scoped cache binding.
pub fn cache_key(
    mut step: StepNode,
    repo_full_name: &str,
    cache_root: &str,
) -> Result<StepNode, Error> {
    if step.phase == Phase::Cache {
        step.volumes
            .push(format!("{cache_root}/{repo_full_name}:/cache"));
        step.environment.push("CACHE_PATH=/cache".to_string());
    }
    Ok(step)
}

/// Propagates the document debug flag into leaf environments.
pub fn debug_env(mut step: StepNode, debug: bool) -> Result<StepNode, Error> {
    if debug {
        step.environment.push("DEBUG=true".to_string());
    }
    Ok(step)
}

/// Grants privileged mode to the fixed first-party allow-list.
///
/// The decision is identity-based: pipeline content cannot opt in. The
/// escalated leaf loses entrypoint, command, volume and network overrides
/// so the first-party image runs exactly as shipped.
pub fn escalate(mut step: StepNode, images: &[String]) -> Result<StepNode, Error> {
    let bare = step.image.split(':').next().unwrap_or_default();
    if images.iter().any(|allowed| allowed == bare) {
        step.privileged = true;
        step.entrypoint.clear();
        step.command.clear();
        step.commands.clear();
        step.volumes.clear();
        step.network_mode.clear();
    }
    Ok(step)
}

/// Copies host proxy variables into every leaf.
pub fn http_proxy(mut step: StepNode, proxy_env: &[String]) -> Result<StepNode, Error> {
    step.environment.extend(proxy_env.iter().cloned());
    Ok(step)
}

/// Defaults notify leaves with no explicit status guard to failure-only.
pub fn default_notify_filter(mut step: StepNode) -> Result<StepNode, Error> {
    if step.phase == Phase::Notify && step.when.success.is_none() && step.when.failure.is_none() {
        step.when.failure = Some(true);
    }
    Ok(step)
}

/// Rewrites the workspace volume to bind a host path.
pub fn mount(mut step: StepNode, host: &str, workspace_path: &str) -> Result<StepNode, Error> {
    step.volumes.retain(|volume| {
        let target = volume.split(':').nth(1).unwrap_or(volume);
        target != workspace_path
    });
    step.volumes.push(format!("{host}:{workspace_path}"));
    Ok(step)
}

/// Matches a value against a pattern where `*` is a wildcard.
#[must_use]
pub fn match_pattern(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    regex::Regex::new(&format!("^{escaped}$"))
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Reads the configured proxy variables (upper and lower case) from the
/// host environment as `KEY=VALUE` lines.
#[must_use]
pub fn proxy_environment(keys: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for key in keys {
        for name in [key.to_uppercase(), key.to_lowercase()] {
            if let Ok(value) = std::env::var(&name) {
                if !value.is_empty() {
                    out.push(format!("{name}={value}"));
                }
            }
        }
    }
    out
}

fn is_plugin(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::Cache | Phase::Clone | Phase::Publish | Phase::Deploy | Phase::Notify
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::Container;
    use pretty_assertions::assert_eq;

    fn step(phase: Phase, image: &str) -> StepNode {
        StepNode::from_container(
            phase,
            None,
            Container {
                image: image.to_string(),
                ..Container::default()
            },
        )
    }

    #[test]
    fn test_image_name_rejects_empty() {
        let err = image_name(step(Phase::Build, "  ")).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_image_match_expands_short_plugin_names() {
        let patterns = vec!["plugins/*".to_string()];
        let out = image_match(step(Phase::Notify, "slack"), &patterns, "plugins", "drone-").unwrap();
        assert_eq!(out.image, "plugins/drone-slack");

        let out =
            image_match(step(Phase::Clone, "drone-git"), &patterns, "plugins", "drone-").unwrap();
        assert_eq!(out.image, "plugins/drone-git");
    }

    #[test]
    fn test_image_match_skips_build_steps() {
        let patterns = vec!["plugins/*".to_string()];
        let out = image_match(step(Phase::Build, "golang"), &patterns, "plugins", "drone-").unwrap();
        assert_eq!(out.image, "golang");
    }

    #[test]
    fn test_image_match_rejects_unapproved_registry() {
        let patterns = vec!["plugins/*".to_string()];
        let err = image_match(
            step(Phase::Deploy, "evil.example.com/pwn"),
            &patterns,
            "plugins",
            "drone-",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_image_pull_only_with_force() {
        let out = image_pull(step(Phase::Clone, "plugins/drone-git"), false).unwrap();
        assert!(!out.pull);
        let out = image_pull(step(Phase::Clone, "plugins/drone-git"), true).unwrap();
        assert!(out.pull);
    }

    #[test]
    fn test_sanitize_strips_untrusted_overrides() {
        let mut input = step(Phase::Build, "golang");
        input.privileged = true;
        input.entrypoint = vec!["/bin/bash".to_string()];
        input.volumes = vec!["/:/host".to_string()];
        input.network_mode = "host".to_string();

        let out = sanitize(input, false, &["plugins/*".to_string()]).unwrap();
        assert!(!out.privileged);
        assert!(out.entrypoint.is_empty());
        assert!(out.volumes.is_empty());
        assert!(out.network_mode.is_empty());
    }

    #[test]
    fn test_sanitize_keeps_trusted_repo_overrides() {
        let mut input = step(Phase::Build, "golang");
        input.privileged = true;
        let out = sanitize(input, true, &["plugins/*".to_string()]).unwrap();
        assert!(out.privileged);
    }

    #[test]
    fn test_sanitize_exempts_allow_listed_images() {
        let mut input = step(Phase::Cache, "plugins/drone-cache");
        input.volumes = vec!["/var/cache:/cache".to_string()];
        let out = sanitize(input, false, &["plugins/*".to_string()]).unwrap();
        assert_eq!(out.volumes, vec!["/var/cache:/cache"]);
    }

    #[test]
    fn test_cache_key_scopes_to_repository() {
        let out = step(Phase::Cache, "plugins/drone-cache");
        let out = cache_key(out, "acme/hello", "/var/lib/gantry/cache").unwrap();
        assert_eq!(out.volumes, vec!["/var/lib/gantry/cache/acme/hello:/cache"]);
        assert!(out.environment.contains(&"CACHE_PATH=/cache".to_string()));
    }

    #[test]
    fn test_escalate_is_identity_based() {
        let mut input = step(Phase::Publish, "plugins/drone-docker");
        input.command = vec!["sh".to_string()];
        input.volumes = vec!["/:/host".to_string()];
        let allow = vec!["plugins/drone-docker".to_string()];
        let out = escalate(input, &allow).unwrap();
        assert!(out.privileged);
        assert!(out.command.is_empty());
        assert!(out.volumes.is_empty());

        let out = escalate(step(Phase::Publish, "plugins/drone-s3"), &allow).unwrap();
        assert!(!out.privileged);
    }

    #[test]
    fn test_escalate_ignores_tag() {
        let allow = vec!["plugins/drone-docker".to_string()];
        let out = escalate(step(Phase::Publish, "plugins/drone-docker:latest"), &allow).unwrap();
        assert!(out.privileged);
    }

    #[test]
    fn test_default_notify_filter_defaults_to_failure_only() {
        let out = default_notify_filter(step(Phase::Notify, "plugins/drone-slack")).unwrap();
        assert_eq!(out.when.failure, Some(true));
        assert_eq!(out.when.success, None);
    }

    #[test]
    fn test_default_notify_filter_respects_explicit_guard() {
        let mut input = step(Phase::Notify, "plugins/drone-slack");
        input.when.success = Some(true);
        let out = default_notify_filter(input).unwrap();
        assert_eq!(out.when.failure, None);
        assert_eq!(out.when.success, Some(true));
    }

    #[test]
    fn test_mount_rewrites_workspace_volume() {
        let mut input = step(Phase::Build, "golang");
        input.volumes = vec!["/gantry/src/github.com/acme/hello".to_string()];
        let out = mount(input, "/home/dev/hello", "/gantry/src/github.com/acme/hello").unwrap();
        assert_eq!(
            out.volumes,
            vec!["/home/dev/hello:/gantry/src/github.com/acme/hello"]
        );
    }

    #[test]
    fn test_match_pattern() {
        assert!(match_pattern("plugins/*", "plugins/drone-git"));
        assert!(match_pattern("plugins/drone-git", "plugins/drone-git"));
        assert!(!match_pattern("plugins/*", "evil/drone-git"));
        assert!(!match_pattern("plugins/drone-git", "plugins/drone-s3"));
    }
}
