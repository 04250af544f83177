//! Rule-based pipeline parser.
//!
//! Turns injected YAML text into the immutable execution tree: the
//! document is deserialized, each section becomes leaves in canonical
//! order, the rule chain runs over every leaf, and finally guarded leaves
//! are wrapped in filter nodes.

pub mod rules;
pub mod tree;

pub use rules::{default_rules, RuleConfig, RuleContext, RuleFunc};
pub use tree::{Node, Phase, StepNode, Tree};

use super::config::{BuildSection, Container, Document};
use super::errors::Error;

/// Compiles injected YAML text into an execution tree.
///
/// A document without a clone or cache section receives the configured
/// default plugin leaf for that phase; the walker's phase filter decides
/// whether it ever runs.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the document is malformed or any rule in
/// the chain rejects a leaf.
pub fn parse(yaml: &str, cfg: &RuleConfig, ctx: &RuleContext) -> Result<Tree, Error> {
    let doc = Document::parse(yaml)?;
    let chain = default_rules(cfg, ctx);
    parse_document(doc, cfg, &chain)
}

fn parse_document(doc: Document, cfg: &RuleConfig, chain: &[RuleFunc]) -> Result<Tree, Error> {
    let mut nodes = Vec::new();

    let cache = doc.cache.unwrap_or_else(|| plugin(&cfg.default_cacher));
    nodes.push(leaf(Phase::Cache, None, cache));

    let clone = doc.clone.unwrap_or_else(|| plugin(&cfg.default_cloner));
    nodes.push(leaf(Phase::Clone, None, clone));

    for (key, container) in doc.compose.iter() {
        nodes.push(leaf(Phase::Compose, Some(key.to_string()), container.clone()));
    }

    match doc.build {
        Some(BuildSection::Single(container)) => {
            nodes.push(leaf(Phase::Build, None, *container));
        }
        Some(BuildSection::Multi(keyed)) => {
            for (key, container) in keyed.iter() {
                nodes.push(leaf(Phase::Build, Some(key.to_string()), container.clone()));
            }
        }
        None => {}
    }

    for (phase, section) in [
        (Phase::Publish, &doc.publish),
        (Phase::Deploy, &doc.deploy),
        (Phase::Notify, &doc.notify),
    ] {
        for (key, container) in section.iter() {
            nodes.push(leaf(phase, Some(key.to_string()), container.clone()));
        }
    }

    let mut root = Node::List(nodes);
    for rule in chain {
        root = tree::map_steps(root, rule)?;
    }
    root = wrap_filters(root);

    Ok(Tree { root })
}

fn plugin(image: &str) -> Container {
    Container {
        image: image.to_string(),
        ..Container::default()
    }
}

fn leaf(phase: Phase, key: Option<String>, container: Container) -> Node {
    Node::Step(Box::new(StepNode::from_container(phase, key, container)))
}

/// Wraps every leaf carrying a guard in a filter node, after the rule
/// chain has had its chance to amend the guard.
fn wrap_filters(node: Node) -> Node {
    match node {
        Node::List(children) => Node::List(children.into_iter().map(wrap_filters).collect()),
        Node::Filter { when, node } => Node::Filter {
            when,
            node: Box::new(wrap_filters(*node)),
        },
        Node::Step(step) => {
            if step.when.is_empty() {
                Node::Step(step)
            } else {
                let when = step.when.clone();
                Node::Filter {
                    when,
                    node: Box::new(Node::Step(step)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile(yaml: &str) -> Result<Tree, Error> {
        let ctx = RuleContext {
            repo_full_name: "acme/hello".to_string(),
            workspace_path: "/gantry/src/github.com/acme/hello".to_string(),
            ..RuleContext::default()
        };
        parse(yaml, &RuleConfig::default(), &ctx)
    }

    #[test]
    fn test_parse_injects_default_clone_and_cache() {
        let tree = compile("build:\n  image: golang\n  commands: [go build]").unwrap();
        let mut images = Vec::new();
        tree.each_step(&mut |step| images.push((step.phase, step.image.clone())));
        assert_eq!(
            images,
            vec![
                (Phase::Cache, "plugins/drone-cache".to_string()),
                (Phase::Clone, "plugins/drone-git".to_string()),
                (Phase::Build, "golang".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_preserves_section_and_key_order() {
        let yaml = "build:\n  image: golang\npublish:\n  s3:\n    image: plugins/drone-s3\n  docker:\n    image: plugins/drone-docker\n";
        let tree = compile(yaml).unwrap();
        let mut keys = Vec::new();
        tree.each_step(&mut |step| {
            if step.phase == Phase::Publish {
                keys.push(step.key.clone().unwrap());
            }
        });
        assert_eq!(keys, vec!["s3", "docker"]);
    }

    #[test]
    fn test_parse_missing_image_fails() {
        let err = compile("build:\n  commands: [go build]").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_wraps_guarded_leaves() {
        let yaml = "build:\n  image: golang\ndeploy:\n  ssh:\n    image: plugins/drone-ssh\n    when:\n      branch: master\n";
        let tree = compile(yaml).unwrap();

        fn find_filters(node: &Node, out: &mut Vec<String>) {
            match node {
                Node::List(children) => children.iter().for_each(|n| find_filters(n, out)),
                Node::Filter { when, node } => {
                    out.push(when.branch.as_slice().join(","));
                    find_filters(node, out);
                }
                Node::Step(_) => {}
            }
        }
        let mut guards = Vec::new();
        find_filters(&tree.root, &mut guards);
        // deploy guard plus the defaulted notify guard is absent (no
        // notify section), so exactly one filter.
        assert_eq!(guards, vec!["master"]);
    }

    #[test]
    fn test_parse_notify_gets_default_failure_guard() {
        let yaml = "build:\n  image: golang\nnotify:\n  slack:\n    image: plugins/drone-slack\n";
        let tree = compile(yaml).unwrap();
        let mut found = false;
        tree.each_step(&mut |step| {
            if step.phase == Phase::Notify {
                found = true;
                assert_eq!(step.when.failure, Some(true));
            }
        });
        assert!(found);
    }

    #[test]
    fn test_parse_multi_build_keys() {
        let yaml = "build:\n  backend:\n    image: golang\n  frontend:\n    image: node\n";
        let tree = compile(yaml).unwrap();
        let mut keys = Vec::new();
        tree.each_step(&mut |step| {
            if step.phase == Phase::Build {
                keys.push(step.key.clone().unwrap());
            }
        });
        assert_eq!(keys, vec!["backend", "frontend"]);
    }
}
