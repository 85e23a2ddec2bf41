use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::debug;

use crate::connection::{Connection, FieldDescriptor};
use crate::{Error, Result};

/// Compound field types; the bulk query API rejects them in a select list.
pub const COMPOUND_FIELD_TYPES: &[&str] = &["address", "location"];

/// Bulk-queryable fields of one object, in describe order.
///
/// Serializes as a map of field name to descriptor, which is the content
/// of a `schema` envelope. Map entries keep describe order both ways.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaDescriptor {
    fields: Vec<FieldDescriptor>,
}

impl SchemaDescriptor {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `SELECT <every field> FROM <object>`
    pub fn select_query(&self, object_name: &str) -> String {
        let fields: Vec<&str> = self.field_names().collect();
        format!("SELECT {} FROM {}", fields.join(", "), object_name)
    }
}

impl Serialize for SchemaDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.name, field)?;
        }
        map.end()
    }
}

struct SchemaVisitor;

impl<'de> Visitor<'de> for SchemaVisitor {
    type Value = SchemaDescriptor;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of field name to field descriptor")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((_, field)) = access.next_entry::<String, FieldDescriptor>()? {
            fields.push(field);
        }
        Ok(SchemaDescriptor::new(fields))
    }
}

impl<'de> Deserialize<'de> for SchemaDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// Describe `object_name` and keep the fields a bulk query can select.
///
/// Nothing is cached; every extraction resolves the schema again.
pub async fn resolve(connection: &dyn Connection, object_name: &str) -> Result<SchemaDescriptor> {
    let described = connection
        .describe(object_name)
        .await
        .map_err(|e| Error::RemoteDescribe {
            object: object_name.to_string(),
            message: e.to_string(),
        })?;

    let total = described.len();
    let fields: Vec<FieldDescriptor> = described
        .into_iter()
        .filter(|f| !COMPOUND_FIELD_TYPES.contains(&f.field_type.as_str()))
        .collect();

    if fields.is_empty() {
        return Err(Error::RemoteDescribe {
            object: object_name.to_string(),
            message: "no bulk-queryable fields".to_string(),
        });
    }

    debug!(
        object = %object_name,
        "Resolved {} of {} fields as bulk-queryable",
        fields.len(),
        total
    );

    Ok(SchemaDescriptor::new(fields))
}
