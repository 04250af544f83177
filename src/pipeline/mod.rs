//! Pipeline compilation: document model, secret verification, variable
//! injection and the rule-based parser.

pub mod config;
pub mod errors;
pub mod inject;
pub mod parser;
pub mod secrets;
pub mod types;

pub use config::{AuthConfig, Container, Document, When, WORKSPACE_ROOT};
pub use errors::Error;
pub use parser::{Node, Phase, RuleConfig, RuleContext, StepNode, Tree};
pub use secrets::{Bundle, TrustLevel};
pub use types::{Command, EnvMap, Keyed, StringOrSlice};
