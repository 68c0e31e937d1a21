//! The znode tree shared by every store backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ANY_VERSION, error::CoordinationError, path};

/// Node metadata returned alongside reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Starts at 0 on create, incremented by every `set_data`.
    pub version: i64,
    pub ctime_ms: i64,
    pub mtime_ms: i64,
    pub num_children: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ZNode {
    data: Vec<u8>,
    version: i64,
    ctime_ms: i64,
    mtime_ms: i64,
}

impl ZNode {
    fn new(data: Vec<u8>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            data,
            version: 0,
            ctime_ms: now,
            mtime_ms: now,
        }
    }
}

/// Path-keyed znodes. The root always exists and cannot be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZNodeTree {
    nodes: BTreeMap<String, ZNode>,
}

impl Default for ZNodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ZNodeTree {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(path::ROOT.to_string(), ZNode::new(Vec::new()));
        Self { nodes }
    }

    pub fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        make_parents: bool,
    ) -> Result<String, CoordinationError> {
        path::validate(path)?;
        if self.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists {
                path: path.to_string(),
            });
        }

        let missing: Vec<String> = path::ancestors(path)
            .into_iter()
            .filter(|ancestor| !self.nodes.contains_key(*ancestor))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() && !make_parents {
            return Err(CoordinationError::NoNode {
                path: missing[0].clone(),
            });
        }

        for ancestor in missing {
            self.nodes.insert(ancestor, ZNode::new(Vec::new()));
        }
        self.nodes.insert(path.to_string(), ZNode::new(data));
        Ok(path.to_string())
    }

    pub fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), CoordinationError> {
        path::validate(path)?;
        let node = self.node(path)?;
        Ok((node.data.clone(), self.stat(path, node)))
    }

    pub fn set_data(
        &mut self,
        path: &str,
        data: Vec<u8>,
        expected_version: i64,
    ) -> Result<Stat, CoordinationError> {
        path::validate(path)?;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })?;
        check_version(path, node, expected_version)?;

        node.data = data;
        node.version += 1;
        node.mtime_ms = chrono::Utc::now().timestamp_millis();

        let node = self.node(path)?;
        Ok(self.stat(path, node))
    }

    pub fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError> {
        path::validate(path)?;
        Ok(self.nodes.get(path).map(|node| self.stat(path, node)))
    }

    /// Child names, sorted.
    pub fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        path::validate(path)?;
        self.node(path)?;
        Ok(self.child_names(path).into_iter().map(str::to_string).collect())
    }

    pub fn delete(&mut self, path: &str, expected_version: i64) -> Result<(), CoordinationError> {
        path::validate(path)?;
        if path == path::ROOT {
            return Err(CoordinationError::invalid_path(path, "the root cannot be deleted"));
        }
        let node = self.node(path)?;
        check_version(path, node, expected_version)?;
        if !self.child_names(path).is_empty() {
            return Err(CoordinationError::NotEmpty {
                path: path.to_string(),
            });
        }
        self.nodes.remove(path);
        Ok(())
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn node(&self, path: &str) -> Result<&ZNode, CoordinationError> {
        self.nodes.get(path).ok_or_else(|| CoordinationError::NoNode {
            path: path.to_string(),
        })
    }

    fn stat(&self, path: &str, node: &ZNode) -> Stat {
        Stat {
            version: node.version,
            ctime_ms: node.ctime_ms,
            mtime_ms: node.mtime_ms,
            num_children: self.child_names(path).len() as u32,
        }
    }

    fn child_names(&self, parent: &str) -> Vec<&str> {
        let prefix = if parent == path::ROOT {
            path::ROOT.to_string()
        } else {
            format!("{parent}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key.as_str())
            .take_while(|key| key.starts_with(prefix.as_str()))
            .map(|key| &key[prefix.len()..])
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .collect()
    }
}

fn check_version(path: &str, node: &ZNode, expected: i64) -> Result<(), CoordinationError> {
    if expected != ANY_VERSION && expected != node.version {
        return Err(CoordinationError::BadVersion {
            path: path.to_string(),
            expected,
            actual: node.version,
        });
    }
    Ok(())
}
