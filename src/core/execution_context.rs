use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::BatchError;

/// Key/value state attached to a job or step execution.
///
/// The context is what makes restart possible: item streams record their
/// position in it after every committed chunk and read it back when they are
/// opened again by a later execution. Values are stored in their serialized
/// form, so cloning a context always yields an independent copy.
///
/// The dirty flag is raised by every mutation and cleared by the repository
/// once the context has been persisted.
///
/// # Examples
///
/// ```
/// use resumable_batch::core::execution_context::ExecutionContext;
///
/// let mut context = ExecutionContext::new();
/// context.put_long("reader.read.count", 42);
/// assert!(context.is_dirty());
///
/// assert_eq!(context.get_long("reader.read.count"), Some(42));
/// assert_eq!(context.get_long("unknown"), None);
///
/// context.clear_dirty_flag();
/// assert!(!context.is_dirty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    map: BTreeMap<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores any serializable value under `key`.
    ///
    /// # Errors
    /// Returns `BatchError::ExecutionContext` if the value cannot be
    /// serialized. This is a configuration error: the value type can never be
    /// persisted, so there is no point in retrying.
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), BatchError> {
        let value = serde_json::to_value(value).map_err(|error| {
            BatchError::ExecutionContext(format!("value for key '{}' is not serializable: {}", key, error))
        })?;
        self.put_value(key, value);
        Ok(())
    }

    pub fn put_string(&mut self, key: &str, value: &str) {
        self.put_value(key, Value::String(value.to_string()));
    }

    pub fn put_long(&mut self, key: &str, value: i64) {
        self.put_value(key, Value::from(value));
    }

    pub fn put_double(&mut self, key: &str, value: f64) {
        self.put_value(key, Value::from(value));
    }

    fn put_value(&mut self, key: &str, value: Value) {
        let previous = self.map.insert(key.to_string(), value);
        // Writing back an identical value is not a change
        if previous.as_ref() != self.map.get(key) {
            self.dirty = true;
        }
    }

    /// Reads a value back into its typed form.
    ///
    /// # Returns
    /// - `Ok(None)` if the key is absent
    /// - `Ok(Some(value))` if the stored value deserializes into `T`
    /// - `Err(BatchError::ExecutionContext)` if it does not
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BatchError> {
        match self.map.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|error| {
                BatchError::ExecutionContext(format!("value for key '{}' has unexpected type: {}", key, error))
            }),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.map.get(key).and_then(Value::as_i64)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.map.get(key).and_then(Value::as_f64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty_flag(&mut self) {
        self.dirty = false;
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

/// Builds execution context keys namespaced by a component name, so that
/// several streams can share one context without colliding.
///
/// ```
/// use resumable_batch::core::execution_context::ExecutionContextUserSupport;
///
/// let support = ExecutionContextUserSupport::new("customerReader");
/// assert_eq!(support.key("read.count"), "customerReader.read.count");
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContextUserSupport {
    name: String,
}

impl ExecutionContextUserSupport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}.{}", self.name, suffix)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::{Serialize, Serializer};

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Position {
        line: u64,
        file: String,
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no serialized form"))
        }
    }

    #[test]
    fn typed_values_round_trip_through_object_storage() -> Result<(), BatchError> {
        let mut context = ExecutionContext::new();
        let position = Position {
            line: 12,
            file: "input.txt".to_string(),
        };
        context.put("position", &position)?;
        context.put_string("name", "reader");
        context.put_double("ratio", 0.5);

        assert_eq!(context.get::<Position>("position")?, Some(position));
        assert_eq!(context.get_string("name"), Some("reader".to_string()));
        assert_eq!(context.get_double("ratio"), Some(0.5));
        assert_eq!(context.len(), 3);
        Ok(())
    }

    #[test]
    fn non_serializable_value_fails_fast() {
        let mut context = ExecutionContext::new();
        let result = context.put("bad", &Unserializable);
        assert!(matches!(result, Err(BatchError::ExecutionContext(_))));
        assert!(context.is_empty());
        assert!(!context.is_dirty());
    }

    #[test]
    fn map_with_non_string_keys_is_rejected() {
        let mut context = ExecutionContext::new();
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        assert!(context.put("map", &map).is_err());
    }

    #[test]
    fn copies_are_independent() {
        let mut original = ExecutionContext::new();
        original.put_long("count", 1);

        let mut copy = original.clone();
        copy.put_long("count", 2);

        assert_eq!(original.get_long("count"), Some(1));
        assert_eq!(copy.get_long("count"), Some(2));
    }

    #[test]
    fn rewriting_same_value_keeps_context_clean() {
        let mut context = ExecutionContext::new();
        context.put_long("count", 1);
        context.clear_dirty_flag();

        context.put_long("count", 1);
        assert!(!context.is_dirty());

        context.put_long("count", 2);
        assert!(context.is_dirty());
    }

    #[test]
    fn serialized_form_survives_persistence() {
        let mut context = ExecutionContext::new();
        context.put_long("count", 7);
        let json = serde_json::to_string(&context).unwrap();
        let restored: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.get_long("count"), Some(7));
        assert!(!restored.is_dirty());
    }
}
