//! # Entity Schema & Allow-Lists
//!
//! An [`EntitySchema`] is the explicit, immutable description of one entity
//! type: its columns, their scalar types, and the relations that may be
//! traversed with `relation__field` paths. Schemas are built once, when routes
//! are registered, and shared behind an `Arc`.
//!
//! [`Allowlist`] derives from a schema the only fields that search, ordering
//! and filtering may touch. Anything outside it is ignored, which is what keeps
//! client parameters from reaching sensitive columns such as password hashes.
//!
//! ```rust,ignore
//! let groups = Arc::new(
//!     EntitySchema::new("group", "groups", "id")
//!         .field(FieldDescriptor::new("id", FieldType::Integer))
//!         .field(FieldDescriptor::new("name", FieldType::Text)),
//! );
//! let users = EntitySchema::new("user", "users", "id")
//!     .field(FieldDescriptor::new("id", FieldType::Integer))
//!     .field(FieldDescriptor::new("name", FieldType::Text))
//!     .field(FieldDescriptor::foreign_key("group", "group_id", &groups));
//! ```

use sea_orm::{
    ColumnTrait, ColumnType, EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::PredicateError;
use crate::filtering::predicate::{PATH_SEPARATOR, Value};

/// Scalar type tag of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Uuid,
    DateTime,
    Date,
    Json,
    Other,
}

impl FieldType {
    /// Map a sea-orm column type onto a field type.
    #[must_use]
    pub fn from_column_type(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Char(_) | ColumnType::String(_) | ColumnType::Text => Self::Text,
            ColumnType::TinyInteger
            | ColumnType::SmallInteger
            | ColumnType::Integer
            | ColumnType::BigInteger
            | ColumnType::TinyUnsigned
            | ColumnType::SmallUnsigned
            | ColumnType::Unsigned
            | ColumnType::BigUnsigned => Self::Integer,
            ColumnType::Float | ColumnType::Double | ColumnType::Decimal(_) => Self::Float,
            ColumnType::Boolean => Self::Boolean,
            ColumnType::Uuid => Self::Uuid,
            ColumnType::DateTime | ColumnType::Timestamp | ColumnType::TimestampWithTimeZone => {
                Self::DateTime
            }
            ColumnType::Date => Self::Date,
            ColumnType::Json | ColumnType::JsonBinary => Self::Json,
            _ => Self::Other,
        }
    }

    /// Convert a raw value into one this field type can be compared with.
    ///
    /// Query parameters always arrive as strings, so numbers, booleans and
    /// UUIDs are parsed here. Date/time, JSON and unknown types keep the string
    /// and leave interpretation to the backing store.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::InvalidValue`] when the value does not parse,
    /// and [`PredicateError::UnresolvedCaller`] if a caller sentinel slipped
    /// through unresolved.
    pub fn coerce(self, field: &str, value: &Value) -> Result<Value, PredicateError> {
        let invalid = |reason: &str| PredicateError::InvalidValue {
            field: field.to_string(),
            reason: format!("{reason}: {value}"),
        };
        match value {
            Value::Null => Ok(Value::Null),
            Value::CurrentCaller => Err(PredicateError::UnresolvedCaller),
            Value::List(items) => items
                .iter()
                .map(|item| self.coerce(field, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            scalar => match self {
                Self::Text => Ok(match scalar {
                    Value::String(_) => scalar.clone(),
                    other => Value::String(other.to_string()),
                }),
                Self::Integer => match scalar {
                    Value::Int(_) => Ok(scalar.clone()),
                    Value::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| invalid("expected an integer")),
                    _ => Err(invalid("expected an integer")),
                },
                Self::Float => match scalar {
                    Value::Float(_) => Ok(scalar.clone()),
                    #[allow(clippy::cast_precision_loss)]
                    Value::Int(i) => Ok(Value::Float(*i as f64)),
                    Value::String(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| invalid("expected a number")),
                    _ => Err(invalid("expected a number")),
                },
                Self::Boolean => match scalar {
                    Value::Bool(_) => Ok(scalar.clone()),
                    Value::String(s) => match s.as_str() {
                        "true" | "True" | "t" | "1" => Ok(Value::Bool(true)),
                        "false" | "False" | "f" | "0" => Ok(Value::Bool(false)),
                        _ => Err(invalid("expected a boolean")),
                    },
                    Value::Int(1) => Ok(Value::Bool(true)),
                    Value::Int(0) => Ok(Value::Bool(false)),
                    _ => Err(invalid("expected a boolean")),
                },
                Self::Uuid => match scalar {
                    Value::Uuid(_) => Ok(scalar.clone()),
                    Value::String(s) => Uuid::parse_str(s.trim())
                        .map(Value::Uuid)
                        .map_err(|_| invalid("expected a UUID")),
                    _ => Err(invalid("expected a UUID")),
                },
                Self::DateTime | Self::Date | Self::Json | Self::Other => Ok(scalar.clone()),
            },
        }
    }
}

/// Direction of a relation as seen from the entity declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This entity holds the foreign key column.
    ForeignKey,
    /// The target entity holds a foreign key pointing back here.
    Reverse,
}

/// Link to another entity. A row matches through the relation when its
/// `local_column` equals the `remote_column` of some target row.
#[derive(Debug, Clone)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: Arc<EntitySchema>,
    pub local_column: String,
    pub remote_column: String,
}

/// One field of an entity.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
    pub relation: Option<Relation>,
}

impl FieldDescriptor {
    /// A plain column whose name matches the field name.
    #[must_use]
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            column: name.to_string(),
            field_type,
            relation: None,
        }
    }

    /// Store the field under a differently named column.
    #[must_use]
    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }

    /// A forward relation stored in `column` and referencing the target's
    /// primary key. Compared directly, it takes the target key's type.
    #[must_use]
    pub fn foreign_key(name: &str, column: &str, target: &Arc<EntitySchema>) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            field_type: target.primary_key_type(),
            relation: Some(Relation {
                kind: RelationKind::ForeignKey,
                target: Arc::clone(target),
                local_column: column.to_string(),
                remote_column: target.primary_key_column().to_string(),
            }),
        }
    }

    #[must_use]
    pub const fn is_relation(&self) -> bool {
        self.relation.is_some()
    }
}

/// Immutable metadata describing an entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub fields: Vec<FieldDescriptor>,
    /// Relations declared on other entities that point at this one.
    pub reverse_relations: Vec<FieldDescriptor>,
    /// Stored ordering, `-field` for descending.
    pub default_ordering: Vec<String>,
}

impl EntitySchema {
    #[must_use]
    pub fn new(name: &str, table: &str, primary_key: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            fields: Vec::new(),
            reverse_relations: Vec::new(),
            default_ordering: Vec::new(),
        }
    }

    /// Build a schema from a sea-orm entity's columns. Relations are not
    /// discoverable from the entity and are added with the builder methods.
    #[must_use]
    pub fn from_entity<E>() -> Self
    where
        E: EntityTrait,
    {
        let entity = E::default();
        let primary_key = E::PrimaryKey::iter()
            .next()
            .map_or_else(|| "id".to_string(), |pk| pk.into_column().as_str().to_string());
        let fields = E::Column::iter()
            .map(|column| {
                FieldDescriptor::new(
                    column.as_str(),
                    FieldType::from_column_type(column.def().get_column_type()),
                )
            })
            .collect();

        Self {
            name: entity.table_name().to_string(),
            table: entity.table_name().to_string(),
            primary_key,
            fields,
            reverse_relations: Vec::new(),
            default_ordering: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    /// Declare a relation owned by `target` whose `remote_column` references
    /// this entity's primary key.
    #[must_use]
    pub fn reverse_relation(mut self, name: &str, target: &Arc<EntitySchema>, remote_column: &str) -> Self {
        let field_type = target.primary_key_type();
        self.reverse_relations.push(FieldDescriptor {
            name: name.to_string(),
            column: self.primary_key_column().to_string(),
            field_type,
            relation: Some(Relation {
                kind: RelationKind::Reverse,
                target: Arc::clone(target),
                local_column: self.primary_key_column().to_string(),
                remote_column: remote_column.to_string(),
            }),
        });
        self
    }

    #[must_use]
    pub fn ordering(mut self, ordering: &[&str]) -> Self {
        self.default_ordering = ordering.iter().map(ToString::to_string).collect();
        self
    }

    /// Look up a field or reverse relation by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .chain(self.reverse_relations.iter())
            .find(|f| f.name == name)
    }

    #[must_use]
    pub fn primary_key_column(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.name == self.primary_key)
            .map_or(self.primary_key.as_str(), |f| f.column.as_str())
    }

    #[must_use]
    pub fn primary_key_type(&self) -> FieldType {
        self.fields
            .iter()
            .find(|f| f.name == self.primary_key)
            .map_or(FieldType::Other, |f| f.field_type)
    }

    /// Walk a `relation__field` path and return the terminal field.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::UnknownField`] if any segment does not exist or
    /// a non-relation field is traversed.
    pub fn resolve(&self, path: &str) -> Result<&FieldDescriptor, PredicateError> {
        let unknown = || PredicateError::UnknownField(path.to_string());
        let mut segments = path.split(PATH_SEPARATOR);
        let mut field = segments.next().and_then(|s| self.get(s)).ok_or_else(unknown)?;
        for segment in segments {
            let relation = field.relation.as_ref().ok_or_else(unknown)?;
            field = relation.target.get(segment).ok_or_else(unknown)?;
        }
        Ok(field)
    }
}

/// Fields each operation may touch, derived once per controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    /// Search fields, optionally prefixed with a `^`, `=` or `@` sigil.
    pub searchable: Vec<String>,
    pub orderable: Vec<String>,
    pub filterable: Vec<String>,
}

impl Allowlist {
    /// Default allow-lists for `schema`, leaving out every name in `exclude`.
    ///
    /// - filterable: all fields plus reverse relations
    /// - searchable: text fields, or when there are none, the text fields of
    ///   directly related entities as `relation__field`
    /// - orderable: all non-relation fields
    #[must_use]
    pub fn derive(schema: &EntitySchema, exclude: &[String]) -> Self {
        let excluded = |name: &str| exclude.iter().any(|e| e == name);
        let fields: Vec<&FieldDescriptor> = schema.fields.iter().filter(|f| !excluded(&f.name)).collect();

        let filterable = fields
            .iter()
            .map(|f| f.name.clone())
            .chain(
                schema
                    .reverse_relations
                    .iter()
                    .filter(|f| !excluded(&f.name))
                    .map(|f| f.name.clone()),
            )
            .collect();

        let mut searchable: Vec<String> = fields
            .iter()
            .filter(|f| !f.is_relation() && f.field_type == FieldType::Text)
            .map(|f| f.name.clone())
            .collect();
        if searchable.is_empty() {
            for field in &fields {
                let Some(relation) = &field.relation else { continue };
                for related in &relation.target.fields {
                    if related.is_relation() || related.field_type != FieldType::Text {
                        continue;
                    }
                    let name = format!("{}{PATH_SEPARATOR}{}", field.name, related.name);
                    if !excluded(&name) {
                        searchable.push(name);
                    }
                }
            }
        }

        let orderable = fields
            .iter()
            .filter(|f| !f.is_relation())
            .map(|f| f.name.clone())
            .collect();

        Self {
            searchable,
            orderable,
            filterable,
        }
    }
}
