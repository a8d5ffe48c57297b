//! Structural paths identifying schema nodes.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::errors::EngineError;

/// One child-selection step from a node to one of its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathStep {
    /// First component of a `pair`, left branch of an `or`.
    Left,
    /// Second component of a `pair`, right branch of an `or`.
    Right,
    /// Element of a `list` or `set`.
    Element,
    /// Key of a `map` or `big_map`.
    Key,
    /// Value of a `map` or `big_map`.
    Value,
    /// Wrapped type of `option`, `contract` or `ticket`.
    Inner,
    /// Argument of a `lambda`.
    Parameter,
    /// Result of a `lambda`.
    Return,
}

impl PathStep {
    pub fn code(self) -> &'static str {
        match self {
            PathStep::Left => "0",
            PathStep::Right => "1",
            PathStep::Element => "e",
            PathStep::Key => "k",
            PathStep::Value => "v",
            PathStep::Inner => "o",
            PathStep::Parameter => "p",
            PathStep::Return => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(PathStep::Left),
            "1" => Some(PathStep::Right),
            "e" => Some(PathStep::Element),
            "k" => Some(PathStep::Key),
            "v" => Some(PathStep::Value),
            "o" => Some(PathStep::Inner),
            "p" => Some(PathStep::Parameter),
            "r" => Some(PathStep::Return),
            _ => None,
        }
    }
}

/// Sequence of steps from the root. The root path is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypePath(Vec<PathStep>);

impl TypePath {
    pub fn root() -> Self {
        TypePath(Vec::new())
    }

    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        TypePath(steps)
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &TypePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for step in &self.0 {
            write!(f, "/{}", step.code())?;
        }
        Ok(())
    }
}

impl FromStr for TypePath {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('$')
            .ok_or_else(|| EngineError::malformed(format!("path {s:?} must start with '$'")))?;
        rest.split('/')
            .filter(|part| !part.is_empty())
            .map(|part| {
                PathStep::from_code(part)
                    .ok_or_else(|| EngineError::malformed(format!("unknown path step {part:?}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(TypePath)
    }
}

impl Serialize for TypePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<Vec<PathStep>> for TypePath {
    fn from(steps: Vec<PathStep>) -> Self {
        TypePath(steps)
    }
}
