//! On-file schema stored as an arena of nodes.
//!
//! Nested columns form a tree (list element, map key/value, struct children).
//! The tree lives in a flat `Vec<SchemaNode>` addressed by [`NodeId`], so
//! recursive decoders pass indices instead of borrowing into the tree.
//! [`FileSchema::new`] rejects shapes that are not a forest, which bounds
//! every recursion over the schema by its depth.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Fields, TimeUnit};
use bitcode::{Decode, Encode};
use colscan_result::{Error, Result};

/// Index of a node in a [`FileSchema`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Storage type of a column's values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum PhysicalType {
    Boolean,
    Int32,
    Int64,
    /// Legacy 12-byte timestamp: nanoseconds of day (8 bytes LE) then Julian day (4 bytes LE).
    Int96,
    Float,
    Double,
    ByteArray,
    FixedLenByteArray(u32),
    /// Non-leaf node (list, map, struct).
    Group,
}

impl PhysicalType {
    /// Variable-length or fixed-length binary storage.
    #[inline]
    pub fn is_binary(self) -> bool {
        matches!(self, PhysicalType::ByteArray | PhysicalType::FixedLenByteArray(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum TimestampUnit {
    Millis,
    Micros,
    Nanos,
}

impl TimestampUnit {
    pub fn to_arrow(self) -> TimeUnit {
        match self {
            TimestampUnit::Millis => TimeUnit::Millisecond,
            TimestampUnit::Micros => TimeUnit::Microsecond,
            TimestampUnit::Nanos => TimeUnit::Nanosecond,
        }
    }
}

/// Interpretation layered on top of the physical type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum LogicalType {
    None,
    String,
    Enum,
    Json,
    Integer { bit_width: u8, signed: bool },
    Decimal { precision: u8, scale: i8 },
    Date,
    Timestamp { unit: TimestampUnit, utc: bool },
    List,
    Map,
    Struct,
    /// Annotation written by a newer writer that this reader does not know.
    Unknown,
}

/// One field of the file schema.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SchemaNode {
    pub name: String,
    pub physical_type: PhysicalType,
    pub logical_type: LogicalType,
    pub nullable: bool,
    /// List: `[element]`. Map: `[key, value]`. Struct: fields in order.
    pub children: Vec<NodeId>,
}

impl SchemaNode {
    #[inline]
    pub fn is_complex(&self) -> bool {
        self.physical_type == PhysicalType::Group
    }

    /// String-like byte arrays that decode to UTF-8.
    pub fn is_string(&self) -> bool {
        self.physical_type == PhysicalType::ByteArray
            && matches!(
                self.logical_type,
                LogicalType::String | LogicalType::Enum | LogicalType::Json
            )
    }
}

/// Parsed schema of one file.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FileSchema {
    nodes: Vec<SchemaNode>,
    roots: Vec<NodeId>,
}

impl FileSchema {
    /// Build a schema, validating that `nodes` form a forest rooted at `roots`.
    pub fn new(nodes: Vec<SchemaNode>, roots: Vec<NodeId>) -> Result<Self> {
        let mut parent_count = vec![0u32; nodes.len()];
        for id in &roots {
            let slot = parent_count
                .get_mut(id.index())
                .ok_or_else(|| Error::corrupt(format!("schema root {} out of range", id.0)))?;
            *slot += 1;
        }
        for (idx, node) in nodes.iter().enumerate() {
            let expected = match node.logical_type {
                LogicalType::List => Some(1),
                LogicalType::Map => Some(2),
                _ => None,
            };
            if let Some(expected) = expected
                && node.children.len() != expected
            {
                return Err(Error::corrupt(format!(
                    "schema node '{}' has {} children, expected {expected}",
                    node.name,
                    node.children.len()
                )));
            }
            if node.is_complex() == node.children.is_empty()
                && node.logical_type != LogicalType::Struct
            {
                return Err(Error::corrupt(format!(
                    "schema node '{}' has mismatched physical type and children",
                    node.name
                )));
            }
            for child in &node.children {
                if child.index() == idx {
                    return Err(Error::corrupt(format!(
                        "schema node '{}' contains itself",
                        node.name
                    )));
                }
                let slot = parent_count.get_mut(child.index()).ok_or_else(|| {
                    Error::corrupt(format!("schema child {} out of range", child.0))
                })?;
                *slot += 1;
            }
        }
        if let Some(idx) = parent_count.iter().position(|c| *c != 1) {
            return Err(Error::corrupt(format!(
                "schema node {idx} is referenced {} times",
                parent_count[idx]
            )));
        }
        let schema = Self { nodes, roots };
        // A forest where every node has exactly one parent can still contain a
        // detached cycle; walking from the roots must reach every node.
        let mut seen = 0usize;
        let mut stack: Vec<NodeId> = schema.roots.clone();
        while let Some(id) = stack.pop() {
            seen += 1;
            if seen > schema.nodes.len() {
                break;
            }
            stack.extend(schema.nodes[id.index()].children.iter().copied());
        }
        if seen != schema.nodes.len() {
            return Err(Error::corrupt("schema contains unreachable or cyclic nodes"));
        }
        Ok(schema)
    }

    pub fn builder() -> FileSchemaBuilder {
        FileSchemaBuilder::default()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn nodes(&self) -> &[SchemaNode] {
        &self.nodes
    }

    #[inline]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Top-level column by name. Exact match first, then ASCII case-insensitive.
    pub fn root_by_name(&self, name: &str) -> Option<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|id| self.node(*id).name == name)
            .or_else(|| {
                self.roots
                    .iter()
                    .copied()
                    .find(|id| self.node(*id).name.eq_ignore_ascii_case(name))
            })
    }

    /// Child of a struct node by name.
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let children = &self.node(parent).children;
        children
            .iter()
            .copied()
            .find(|id| self.node(*id).name == name)
            .or_else(|| {
                children
                    .iter()
                    .copied()
                    .find(|id| self.node(*id).name.eq_ignore_ascii_case(name))
            })
    }

    /// Whether the node or any descendant is a group.
    pub fn is_complex(&self, id: NodeId) -> bool {
        self.node(id).is_complex()
    }

    /// Arrow type that the on-file column naturally decodes to.
    pub fn arrow_type(&self, id: NodeId) -> DataType {
        let node = self.node(id);
        match node.physical_type {
            PhysicalType::Group => match node.logical_type {
                LogicalType::List => {
                    let element = node.children[0];
                    DataType::List(Arc::new(self.arrow_field(element, "element")))
                }
                LogicalType::Map => {
                    let key = self.arrow_field(node.children[0], "key").with_nullable(false);
                    let value = self.arrow_field(node.children[1], "value");
                    let entries = Field::new(
                        "entries",
                        DataType::Struct(Fields::from(vec![key, value])),
                        false,
                    );
                    DataType::Map(Arc::new(entries), false)
                }
                _ => DataType::Struct(self.struct_fields(id)),
            },
            PhysicalType::Boolean => DataType::Boolean,
            PhysicalType::Int32 => match node.logical_type {
                LogicalType::Integer { bit_width: 8, signed: true } => DataType::Int8,
                LogicalType::Integer { bit_width: 16, signed: true } => DataType::Int16,
                LogicalType::Integer { bit_width: 8, signed: false } => DataType::UInt8,
                LogicalType::Integer { bit_width: 16, signed: false } => DataType::UInt16,
                LogicalType::Integer { bit_width: 32, signed: false } => DataType::UInt32,
                LogicalType::Date => DataType::Date32,
                LogicalType::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
                _ => DataType::Int32,
            },
            PhysicalType::Int64 => match node.logical_type {
                LogicalType::Integer { bit_width: 64, signed: false } => DataType::UInt64,
                LogicalType::Timestamp { unit, utc } => {
                    DataType::Timestamp(unit.to_arrow(), utc.then(|| "UTC".into()))
                }
                LogicalType::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
                _ => DataType::Int64,
            },
            PhysicalType::Int96 => DataType::Timestamp(TimeUnit::Nanosecond, None),
            PhysicalType::Float => DataType::Float32,
            PhysicalType::Double => DataType::Float64,
            PhysicalType::ByteArray => match node.logical_type {
                LogicalType::String | LogicalType::Enum | LogicalType::Json => DataType::Utf8,
                LogicalType::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
                _ => DataType::Binary,
            },
            PhysicalType::FixedLenByteArray(width) => match node.logical_type {
                LogicalType::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
                _ => DataType::FixedSizeBinary(width as i32),
            },
        }
    }

    /// Arrow field for a node, named `name`.
    pub fn arrow_field(&self, id: NodeId, name: &str) -> Field {
        Field::new(name, self.arrow_type(id), self.node(id).nullable)
    }

    fn struct_fields(&self, id: NodeId) -> Fields {
        self.node(id)
            .children
            .iter()
            .map(|child| {
                let node = self.node(*child);
                self.arrow_field(*child, &node.name)
            })
            .collect()
    }
}

/// Incremental builder for [`FileSchema`]. Children are added before parents.
#[derive(Debug, Default)]
pub struct FileSchemaBuilder {
    nodes: Vec<SchemaNode>,
    roots: Vec<NodeId>,
}

impl FileSchemaBuilder {
    fn push(&mut self, node: SchemaNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Add a primitive node.
    pub fn leaf(
        &mut self,
        name: &str,
        physical_type: PhysicalType,
        logical_type: LogicalType,
        nullable: bool,
    ) -> NodeId {
        self.push(SchemaNode {
            name: name.to_string(),
            physical_type,
            logical_type,
            nullable,
            children: Vec::new(),
        })
    }

    pub fn list(&mut self, name: &str, nullable: bool, element: NodeId) -> NodeId {
        self.group(name, LogicalType::List, nullable, vec![element])
    }

    pub fn map(&mut self, name: &str, nullable: bool, key: NodeId, value: NodeId) -> NodeId {
        self.group(name, LogicalType::Map, nullable, vec![key, value])
    }

    pub fn structure(&mut self, name: &str, nullable: bool, children: Vec<NodeId>) -> NodeId {
        self.group(name, LogicalType::Struct, nullable, children)
    }

    fn group(
        &mut self,
        name: &str,
        logical_type: LogicalType,
        nullable: bool,
        children: Vec<NodeId>,
    ) -> NodeId {
        self.push(SchemaNode {
            name: name.to_string(),
            physical_type: PhysicalType::Group,
            logical_type,
            nullable,
            children,
        })
    }

    /// Mark a node as a top-level column.
    pub fn root(&mut self, id: NodeId) -> &mut Self {
        self.roots.push(id);
        self
    }

    pub fn build(self) -> Result<FileSchema> {
        FileSchema::new(self.nodes, self.roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_schema_maps_to_arrow() {
        let mut b = FileSchema::builder();
        let id = b.leaf("id", PhysicalType::Int64, LogicalType::None, false);
        let element = b.leaf("element", PhysicalType::ByteArray, LogicalType::String, true);
        let tags = b.list("tags", true, element);
        let key = b.leaf("key", PhysicalType::ByteArray, LogicalType::String, false);
        let value = b.leaf("value", PhysicalType::Int32, LogicalType::None, true);
        let attrs = b.map("attrs", true, key, value);
        b.root(id).root(tags).root(attrs);
        let schema = b.build().unwrap();

        assert_eq!(schema.root_by_name("TAGS"), Some(tags));
        assert!(schema.is_complex(attrs));
        assert_eq!(
            schema.arrow_type(tags),
            DataType::List(Arc::new(Field::new("element", DataType::Utf8, true)))
        );
        assert!(matches!(schema.arrow_type(attrs), DataType::Map(_, false)));
    }

    #[test]
    fn shared_children_are_rejected() {
        let mut b = FileSchema::builder();
        let leaf = b.leaf("x", PhysicalType::Int32, LogicalType::None, true);
        let a = b.structure("a", true, vec![leaf]);
        let c = b.structure("c", true, vec![leaf]);
        b.root(a).root(c);
        assert!(matches!(b.build(), Err(Error::CorruptData(_))));
    }

    #[test]
    fn decimal_and_temporal_annotations() {
        let mut b = FileSchema::builder();
        let d = b.leaf(
            "price",
            PhysicalType::FixedLenByteArray(9),
            LogicalType::Decimal { precision: 20, scale: 2 },
            true,
        );
        let ts = b.leaf(
            "ts",
            PhysicalType::Int64,
            LogicalType::Timestamp { unit: TimestampUnit::Micros, utc: true },
            true,
        );
        b.root(d).root(ts);
        let schema = b.build().unwrap();
        assert_eq!(schema.arrow_type(d), DataType::Decimal128(20, 2));
        assert_eq!(
            schema.arrow_type(ts),
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
    }
}
