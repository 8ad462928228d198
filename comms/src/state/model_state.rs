use std::collections::{BTreeMap, btree_map};

use super::{Result, ShapeErr, Tensor};

/// An ordered mapping from parameter name to tensor, the unit that gets aggregated and versioned.
///
/// Parameters are kept in lexicographic order of their names, so two states holding the same
/// parameters always iterate (and serialize) identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelState {
    params: BTreeMap<String, Tensor>,
}

impl ModelState {
    /// Creates a new empty `ModelState`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter, replacing any previous tensor under the same name.
    ///
    /// # Arguments
    /// * `name` - The name of the parameter.
    /// * `tensor` - The value of the parameter.
    ///
    /// # Returns
    /// The previous tensor stored under `name`, if any.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.params.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.params.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Returns the amount of parameters (not elements) in this state.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Tensor> {
        self.params.iter()
    }

    /// Creates a state with the same parameters as this one, all set to zero.
    pub fn zeros_like(&self) -> Self {
        self.params
            .iter()
            .map(|(name, tensor)| (name.clone(), Tensor::zeros(tensor.shape())))
            .collect()
    }

    /// Checks that `other` holds exactly the same parameters as this state, with the same shapes.
    ///
    /// # Arguments
    /// * `other` - The state to check against this one.
    ///
    /// # Returns
    /// The first difference found as a `ShapeErr`.
    pub fn check_compatible(&self, other: &ModelState) -> Result<()> {
        for (name, tensor) in &self.params {
            let Some(theirs) = other.params.get(name) else {
                return Err(ShapeErr::MissingParam(name.clone()));
            };

            if theirs.shape() != tensor.shape() {
                return Err(ShapeErr::ShapeMismatch {
                    param: name.clone(),
                    got: theirs.shape().to_vec(),
                    expected: tensor.shape().to_vec(),
                });
            }
        }

        match other.names().find(|name| !self.contains(name)) {
            Some(name) => Err(ShapeErr::UnexpectedParam(name.to_string())),
            None => Ok(()),
        }
    }
}

impl FromIterator<(String, Tensor)> for ModelState {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ModelState {
    type Item = (&'a String, &'a Tensor);
    type IntoIter = btree_map::Iter<'a, String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

impl IntoIterator for ModelState {
    type Item = (String, Tensor);
    type IntoIter = btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.into_iter()
    }
}
