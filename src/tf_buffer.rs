use std::collections::{HashMap, HashSet, VecDeque};

use nalgebra::Isometry3;

use crate::{tf_error::TfError, transforms::chain_transforms, LookupTransform};

/// Pose of `child` expressed in `parent`.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameTransform {
    pub parent: String,
    pub child: String,
    pub transform: Isometry3<f64>,
}

impl FrameTransform {
    pub fn new(parent: &str, child: &str, transform: Isometry3<f64>) -> Self {
        Self {
            parent: parent.to_owned(),
            child: child.to_owned(),
            transform,
        }
    }

    fn inverse(&self) -> Self {
        Self {
            parent: self.child.clone(),
            child: self.parent.clone(),
            transform: self.transform.inverse(),
        }
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
struct FrameEdge {
    parent: String,
    child: String,
}

/// Frame graph keeping only the latest sample of every edge.
#[derive(Clone, Debug, Default)]
pub struct TfBuffer {
    child_transform_index: HashMap<String, HashSet<String>>,
    transform_data: HashMap<FrameEdge, Isometry3<f64>>,
}

fn is_finite(transform: &Isometry3<f64>) -> bool {
    transform.translation.vector.iter().all(|v| v.is_finite())
        && transform.rotation.coords.iter().all(|v| v.is_finite())
}

impl TfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores every transform of the batch (and its inverse), replacing older samples.
    ///
    /// Non-finite samples are rejected; the rest of the batch is still applied.
    pub fn handle_incoming_transforms(
        &mut self,
        transforms: impl IntoIterator<Item = FrameTransform>,
    ) -> Result<(), TfError> {
        let mut result = Ok(());
        for transform in transforms {
            if let Err(e) = self.add_transform(&transform) {
                result = Err(e);
            }
        }
        result
    }

    pub fn add_transform(&mut self, transform: &FrameTransform) -> Result<(), TfError> {
        if !is_finite(&transform.transform) {
            return Err(TfError::InvalidTransform(
                transform.parent.clone(),
                transform.child.clone(),
                "non-finite sample".to_owned(),
            ));
        }
        self.insert_edge(transform);
        self.insert_edge(&transform.inverse());
        Ok(())
    }

    fn insert_edge(&mut self, transform: &FrameTransform) {
        self.child_transform_index
            .entry(transform.parent.clone())
            .or_default()
            .insert(transform.child.clone());
        self.transform_data.insert(
            FrameEdge {
                parent: transform.parent.clone(),
                child: transform.child.clone(),
            },
            transform.transform,
        );
    }

    /// Every frame that appears in the graph.
    pub fn frames(&self) -> HashSet<String> {
        self.child_transform_index.keys().cloned().collect()
    }

    /// Retrieves the frames from `from` (exclusive) to `to` (inclusive)
    fn retrieve_transform_path(&self, from: &str, to: &str) -> Result<Vec<String>, TfError> {
        let mut frontier: VecDeque<&str> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut parents: HashMap<&str, &str> = HashMap::new();
        visited.insert(from);
        frontier.push_back(from);

        while let Some(current_node) = frontier.pop_front() {
            if current_node == to {
                break;
            }
            if let Some(children) = self.child_transform_index.get(current_node) {
                for v in children {
                    if visited.insert(v.as_str()) {
                        parents.insert(v.as_str(), current_node);
                        frontier.push_back(v.as_str());
                    }
                }
            }
        }

        let mut res = vec![];
        let mut r = to;
        while r != from {
            res.push(r.to_owned());
            match parents.get(r) {
                Some(&parent) => r = parent,
                None => {
                    return Err(TfError::CouldNotFindTransform(
                        from.to_owned(),
                        to.to_owned(),
                    ))
                }
            }
        }
        res.reverse();
        Ok(res)
    }

    /// Looks up the latest pose of `to` expressed in `from`.
    pub fn lookup_transform(&self, from: &str, to: &str) -> Result<Isometry3<f64>, TfError> {
        let path = self.retrieve_transform_path(from, to)?;
        let mut tf_list = Vec::with_capacity(path.len());
        let mut first = from.to_owned();
        for intermediate in path {
            let node = FrameEdge {
                parent: first,
                child: intermediate.clone(),
            };
            match self.transform_data.get(&node) {
                Some(tf) => tf_list.push(*tf),
                None => {
                    return Err(TfError::CouldNotFindTransform(
                        from.to_owned(),
                        to.to_owned(),
                    ))
                }
            }
            first = intermediate;
        }
        Ok(chain_transforms(&tf_list))
    }
}

impl LookupTransform for TfBuffer {
    fn lookup_transform(&self, from: &str, to: &str) -> Result<Isometry3<f64>, TfError> {
        TfBuffer::lookup_transform(self, from, to)
    }
}
