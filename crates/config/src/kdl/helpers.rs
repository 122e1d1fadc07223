//! Accessors for KDL nodes shaped like `name "value"`.

use kdl::{KdlEntry, KdlNode};

use crate::ConfigError;

/// Child nodes of a block, empty when the node has no `{ ... }`
pub fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|doc| doc.nodes()).unwrap_or(&[])
}

fn positional_args(node: &KdlNode) -> impl Iterator<Item = &KdlEntry> {
    node.entries().iter().filter(|entry| entry.name().is_none())
}

/// First positional argument as a string, if it is one
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    positional_args(node)
        .next()
        .and_then(|entry| entry.value().as_string())
        .map(str::to_string)
}

/// Reject positional arguments and properties on a block node
pub fn ensure_no_args(node: &KdlNode) -> Result<(), ConfigError> {
    if node.entries().is_empty() {
        Ok(())
    } else {
        Err(ConfigError::UnexpectedArgument {
            block: node.name().value().to_string(),
        })
    }
}

fn single_entry<'a>(node: &'a KdlNode, block: &str) -> Result<&'a KdlEntry, ConfigError> {
    let mut args = positional_args(node);
    match (args.next(), args.next()) {
        (Some(entry), None) if node.entries().len() == 1 => Ok(entry),
        _ => Err(ConfigError::InvalidValue {
            block: block.to_string(),
            key: node.name().value().to_string(),
            reason: "expected exactly one value".to_string(),
        }),
    }
}

/// Value of a `key "string"` node
pub fn single_string(node: &KdlNode, block: &str) -> Result<String, ConfigError> {
    single_entry(node, block)?
        .value()
        .as_string()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidValue {
            block: block.to_string(),
            key: node.name().value().to_string(),
            reason: "expected a string".to_string(),
        })
}

/// Value of a `key 42` node, which must be non-negative
pub fn single_u64(node: &KdlNode, block: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        block: block.to_string(),
        key: node.name().value().to_string(),
        reason: "expected a non-negative integer".to_string(),
    };

    let raw = single_entry(node, block)?
        .value()
        .as_integer()
        .ok_or_else(invalid)?;
    u64::try_from(raw).map_err(|_| invalid())
}
