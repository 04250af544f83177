//! The execution tree.
//!
//! A closed tagged union of three node kinds, built once per run and never
//! mutated afterwards. The walker matches exhaustively over the variants,
//! which keeps the leaf set closed and the walk total.

use crate::pipeline::config::{AuthConfig, Container, When};

/// Pipeline phase a leaf belongs to. Every leaf has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Cache restore (pre-build) and rebuild (post-build).
    Cache,
    /// Source checkout.
    Clone,
    /// Auxiliary service containers.
    Compose,
    /// Build steps.
    Build,
    /// Publish steps.
    Publish,
    /// Deploy steps.
    Deploy,
    /// Notify steps.
    Notify,
}

impl Phase {
    /// Lowercase phase name, matching the document section names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Clone => "clone",
            Self::Compose => "compose",
            Self::Build => "build",
            Self::Publish => "publish",
            Self::Deploy => "deploy",
            Self::Notify => "notify",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the execution tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Ordered sequence of children.
    List(Vec<Node>),
    /// A guarded subtree; the guard is evaluated lazily at run time.
    Filter {
        /// The guard conditions.
        when: When,
        /// The guarded subtree.
        node: Box<Node>,
    },
    /// A leaf container step.
    Step(Box<StepNode>),
}

/// A leaf step, fully resolved by the rule chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StepNode {
    /// Phase this leaf belongs to.
    pub phase: Phase,
    /// Step key from the document, used for naming and observability.
    pub key: Option<String>,
    /// Image reference.
    pub image: String,
    /// Always pull the image before running.
    pub pull: bool,
    /// Run in privileged mode.
    pub privileged: bool,
    /// Entrypoint override.
    pub entrypoint: Vec<String>,
    /// Command override.
    pub command: Vec<String>,
    /// Build shell commands.
    pub commands: Vec<String>,
    /// Environment as `KEY=VALUE` lines.
    pub environment: Vec<String>,
    /// Volume bindings.
    pub volumes: Vec<String>,
    /// Network mode; empty means the backend default.
    pub network_mode: String,
    /// Registry credentials.
    pub auth: AuthConfig,
    /// Conditional guard; materialized as a [`Node::Filter`] wrapper after
    /// the rule chain runs.
    pub when: When,
    /// Plugin-specific configuration passed through the payload contract.
    pub vargs: serde_yaml::Mapping,
}

impl StepNode {
    /// Builds a leaf from a document container.
    ///
    /// Keyed sections default a missing image to the step key.
    #[must_use]
    pub fn from_container(phase: Phase, key: Option<String>, container: Container) -> Self {
        let mut image = container.image;
        if image.is_empty() {
            if let Some(key) = &key {
                image.clone_from(key);
            }
        }
        Self {
            phase,
            key,
            image,
            pull: container.pull,
            privileged: container.privileged,
            entrypoint: container.entrypoint.into_vec(),
            command: container.command.into_vec(),
            commands: container.commands.into_vec(),
            environment: container.environment.as_slice().to_vec(),
            volumes: container.volumes.into_vec(),
            network_mode: container.net,
            auth: container.auth_config,
            when: container.when,
            vargs: container.vargs,
        }
    }

    /// Display name for logs and hooks: the step key when present,
    /// otherwise the phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.key.as_deref().unwrap_or_else(|| self.phase.as_str())
    }
}

/// The compiled execution tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    /// Root node.
    pub root: Node,
}

impl Tree {
    /// Visits every leaf, depth first, in source order.
    pub fn each_step(&self, f: &mut impl FnMut(&StepNode)) {
        fn visit(node: &Node, f: &mut impl FnMut(&StepNode)) {
            match node {
                Node::List(children) => {
                    for child in children {
                        visit(child, f);
                    }
                }
                Node::Filter { node, .. } => visit(node, f),
                Node::Step(step) => f(step),
            }
        }
        visit(&self.root, f);
    }
}

/// Maps every leaf through `f`, preserving structure; the rule chain is
/// applied with this.
pub(crate) fn map_steps<E>(
    node: Node,
    f: &impl Fn(StepNode) -> Result<StepNode, E>,
) -> Result<Node, E> {
    match node {
        Node::List(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                out.push(map_steps(child, f)?);
            }
            Ok(Node::List(out))
        }
        Node::Filter { when, node } => Ok(Node::Filter {
            when,
            node: Box::new(map_steps(*node, f)?),
        }),
        Node::Step(step) => Ok(Node::Step(Box::new(f(*step)?))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::Container;

    #[test]
    fn test_step_node_image_defaults_to_key() {
        let step = StepNode::from_container(
            Phase::Notify,
            Some("slack".to_string()),
            Container::default(),
        );
        assert_eq!(step.image, "slack");
        assert_eq!(step.name(), "slack");
    }

    #[test]
    fn test_step_node_name_falls_back_to_phase() {
        let container = Container {
            image: "plugins/drone-git".to_string(),
            ..Container::default()
        };
        let step = StepNode::from_container(Phase::Clone, None, container);
        assert_eq!(step.name(), "clone");
    }

    #[test]
    fn test_each_step_visits_in_order() {
        let leaf = |image: &str| {
            Node::Step(Box::new(StepNode::from_container(
                Phase::Build,
                None,
                Container {
                    image: image.to_string(),
                    ..Container::default()
                },
            )))
        };
        let tree = Tree {
            root: Node::List(vec![
                leaf("a"),
                Node::Filter {
                    when: When::default(),
                    node: Box::new(leaf("b")),
                },
                leaf("c"),
            ]),
        };
        let mut seen = Vec::new();
        tree.each_step(&mut |step| seen.push(step.image.clone()));
        assert_eq!(seen, vec!["a", "b", "c"]);
    }
}
