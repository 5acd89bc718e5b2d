//! Table-to-file column mapping.
//!
//! Resolution runs once per file. Each requested column becomes a
//! [`ResolvedColumn`] that either reads from the file through a [`ReadPlan`],
//! or is filled with a constant (partition value, default, or null).

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Date32Array, Decimal128Array};
use arrow::compute::{CastOptions, can_cast_types, cast_with_options};
use arrow::datatypes::{DataType, Decimal128Type, Field, FieldRef, Fields, TimeUnit};
use arrow::util::display::FormatOptions;
use colscan_expr::{Literal, RescaleStep, decimal::fits_precision};
use colscan_format::{FileSchema, LogicalType, NodeId, PhysicalType};
use colscan_result::{Error, Result};
use rustc_hash::FxHashMap;

use crate::materialize::temporal::date32_to_strings;
use crate::request::{RequestedColumn, ScanRequest};

/// Adapts a decoded column to the requested type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeConverter {
    Identity,
    /// Lossless, order-preserving cast (e.g. int32 to int64).
    Widen { target: DataType },
    /// Cast that fails on values that do not fit.
    Narrow { target: DataType },
    RescaleDecimal {
        precision: u8,
        scale: i8,
        step: RescaleStep,
    },
    /// Reinterpret text: dates rendered as strings, or strings parsed into
    /// another type (unparsable values become null).
    StringReinterpret { target: DataType },
}

impl TypeConverter {
    /// Pick the converter from the decoded type to the requested type.
    pub fn for_types(column: &str, decoded: &DataType, target: &DataType) -> Result<Self> {
        if decoded == target {
            return Ok(TypeConverter::Identity);
        }
        if let (DataType::Decimal128(_, from_scale), DataType::Decimal128(precision, scale)) =
            (decoded, target)
        {
            let step = RescaleStep::new(*from_scale, *scale)
                .map_err(|e| Error::schema_mismatch(column, e))?;
            return Ok(TypeConverter::RescaleDecimal {
                precision: *precision,
                scale: *scale,
                step,
            });
        }
        let reinterpret = matches!(
            (decoded, target),
            (DataType::Date32, DataType::Utf8) | (DataType::Utf8, _)
        );
        if !can_cast_types(decoded, target) {
            return Err(Error::schema_mismatch(
                column,
                format!("file type {decoded} cannot be read as {target}"),
            ));
        }
        Ok(if reinterpret {
            TypeConverter::StringReinterpret {
                target: target.clone(),
            }
        } else if is_widening(decoded, target) {
            TypeConverter::Widen {
                target: target.clone(),
            }
        } else {
            TypeConverter::Narrow {
                target: target.clone(),
            }
        })
    }

    /// Whether `convert` is monotone, so file statistics still bound the
    /// converted values.
    pub fn preserves_order(&self) -> bool {
        match self {
            TypeConverter::Identity | TypeConverter::Widen { .. } => true,
            // rounding to a coarser scale moves values past the file bounds
            TypeConverter::RescaleDecimal { step, .. } => {
                matches!(step, RescaleStep::Identity | RescaleStep::Multiply(_))
            }
            TypeConverter::Narrow { .. } | TypeConverter::StringReinterpret { .. } => false,
        }
    }

    pub fn convert(&self, column: &str, array: ArrayRef) -> Result<ArrayRef> {
        match self {
            TypeConverter::Identity => Ok(array),
            TypeConverter::Widen { target } | TypeConverter::Narrow { target } => {
                let options = CastOptions {
                    safe: false,
                    format_options: FormatOptions::default(),
                };
                cast_with_options(&array, target, &options)
                    .map_err(|e| Error::schema_mismatch(column, e))
            }
            TypeConverter::RescaleDecimal {
                precision,
                scale,
                step,
            } => rescale_decimal(column, &array, *precision, *scale, *step),
            TypeConverter::StringReinterpret { target } => {
                if let (DataType::Date32, DataType::Utf8) = (array.data_type(), target) {
                    let dates: &Date32Array = array.as_primitive();
                    return Ok(Arc::new(date32_to_strings(dates).finish()));
                }
                Ok(cast_with_options(&array, target, &CastOptions::default())?)
            }
        }
    }
}

fn rescale_decimal(
    column: &str,
    array: &ArrayRef,
    precision: u8,
    scale: i8,
    step: RescaleStep,
) -> Result<ArrayRef> {
    let decimals = array
        .as_primitive_opt::<Decimal128Type>()
        .ok_or_else(|| Error::Internal(format!("decimal rescale over {}", array.data_type())))?;
    let mut values = Vec::with_capacity(decimals.len());
    for (idx, value) in decimals.values().iter().enumerate() {
        if decimals.is_null(idx) {
            values.push(0);
            continue;
        }
        match step.apply(*value) {
            Some(out) if fits_precision(out, precision) => values.push(out),
            _ => {
                return Err(Error::schema_mismatch(
                    column,
                    format!("unscaled value {value} does not fit decimal({precision}, {scale})"),
                ));
            }
        }
    }
    let rescaled = Decimal128Array::new(values.into(), decimals.nulls().cloned());
    Ok(Arc::new(rescaled.with_precision_and_scale(precision, scale)?))
}

fn is_widening(from: &DataType, to: &DataType) -> bool {
    use DataType::*;
    match (from, to) {
        (Int8, Int16 | Int32 | Int64)
        | (Int16, Int32 | Int64)
        | (Int32, Int64)
        | (UInt8, UInt16 | UInt32 | UInt64 | Int16 | Int32 | Int64)
        | (UInt16, UInt32 | UInt64 | Int32 | Int64)
        | (UInt32, UInt64 | Int64)
        | (Int8 | Int16 | Int32 | UInt8 | UInt16 | UInt32, Float64)
        | (Int8 | Int16 | UInt8 | UInt16, Float32)
        | (Float32, Float64)
        | (Date32, Timestamp(_, _)) => true,
        (Timestamp(from_unit, _), Timestamp(to_unit, _)) => {
            unit_rank(*to_unit) >= unit_rank(*from_unit)
        }
        _ => false,
    }
}

fn unit_rank(unit: TimeUnit) -> u8 {
    match unit {
        TimeUnit::Second => 0,
        TimeUnit::Millisecond => 1,
        TimeUnit::Microsecond => 2,
        TimeUnit::Nanosecond => 3,
    }
}

/// Converters built during resolution, keyed by column path.
///
/// Owned by one driver and never shared across files.
#[derive(Debug, Default)]
pub struct ConverterCache {
    converters: FxHashMap<String, Arc<TypeConverter>>,
}

impl ConverterCache {
    pub fn get_or_create(
        &mut self,
        path: &str,
        decoded: &DataType,
        target: &DataType,
    ) -> Result<Arc<TypeConverter>> {
        if let Some(existing) = self.converters.get(path) {
            return Ok(Arc::clone(existing));
        }
        let converter = Arc::new(TypeConverter::for_types(path, decoded, target)?);
        self.converters.insert(path.to_string(), Arc::clone(&converter));
        Ok(converter)
    }

    pub fn get(&self, path: &str) -> Option<&Arc<TypeConverter>> {
        self.converters.get(path)
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

/// How to read one requested column (or nested field) from the file.
#[derive(Debug, Clone)]
pub enum ReadPlan {
    Leaf {
        node: NodeId,
        /// Type the raw values decode to before conversion.
        decoded: DataType,
        converter: Arc<TypeConverter>,
        target: DataType,
    },
    List {
        node: NodeId,
        element: Box<ReadPlan>,
        field: FieldRef,
    },
    Map {
        node: NodeId,
        key: Box<ReadPlan>,
        value: Box<ReadPlan>,
        entries: FieldRef,
        sorted: bool,
    },
    /// Requested struct fields in requested order; `None` reads as nulls.
    Struct {
        node: NodeId,
        fields: Vec<(FieldRef, Option<ReadPlan>)>,
    },
}

impl ReadPlan {
    pub fn node(&self) -> NodeId {
        match self {
            ReadPlan::Leaf { node, .. }
            | ReadPlan::List { node, .. }
            | ReadPlan::Map { node, .. }
            | ReadPlan::Struct { node, .. } => *node,
        }
    }

    /// The converter of a top-level primitive column.
    pub fn leaf_converter(&self) -> Option<&TypeConverter> {
        match self {
            ReadPlan::Leaf { converter, .. } => Some(converter),
            _ => None,
        }
    }

    /// Every file node this plan reads, parents before children.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_nodes(&mut out);
        out
    }

    fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        out.push(self.node());
        match self {
            ReadPlan::Leaf { .. } => {}
            ReadPlan::List { element, .. } => element.collect_nodes(out),
            ReadPlan::Map { key, value, .. } => {
                key.collect_nodes(out);
                value.collect_nodes(out);
            }
            ReadPlan::Struct { fields, .. } => {
                for plan in fields.iter().filter_map(|(_, plan)| plan.as_ref()) {
                    plan.collect_nodes(out);
                }
            }
        }
    }
}

/// Where the values of a requested column come from.
#[derive(Debug, Clone)]
pub enum ColumnSource {
    File(ReadPlan),
    Partition(Literal),
    /// Absent from the file: filled with the default, or nulls.
    Missing(Option<Literal>),
}

#[derive(Debug, Clone)]
pub struct ResolvedColumn {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub source: ColumnSource,
    /// Read for delete filtering only; not part of the output.
    pub hidden: bool,
}

impl ResolvedColumn {
    pub fn file_node(&self) -> Option<NodeId> {
        match &self.source {
            ColumnSource::File(plan) => Some(plan.node()),
            _ => None,
        }
    }

    pub fn field(&self) -> Field {
        Field::new(&self.name, self.data_type.clone(), self.nullable)
    }
}

/// Resolved columns for one file, in request order (hidden columns last).
#[derive(Debug, Clone, Default)]
pub struct ColumnMappingPlan {
    columns: Vec<ResolvedColumn>,
    index: FxHashMap<String, usize>,
}

impl ColumnMappingPlan {
    /// Resolve `request` against `schema`.
    ///
    /// `hidden` names extra file columns (read as-is) that the scan needs
    /// internally; those absent from the file are skipped.
    pub fn resolve(
        schema: &FileSchema,
        request: &ScanRequest,
        hidden: &[&str],
        cache: &mut ConverterCache,
    ) -> Result<Self> {
        let mut plan = ColumnMappingPlan::default();
        for column in &request.columns {
            if plan.index.contains_key(&column.name) {
                return Err(Error::InvalidArgumentError(format!(
                    "column '{}' requested twice",
                    column.name
                )));
            }
            let resolved = resolve_column(schema, request, column, cache)?;
            plan.push(resolved);
        }
        for name in hidden {
            if plan.index.contains_key(*name) {
                continue;
            }
            let Some(node) = schema.root_by_name(name) else {
                continue;
            };
            let data_type = schema.arrow_type(node);
            let requested = RequestedColumn::new(*name, data_type.clone(), true);
            let read = build_plan(schema, node, &requested.name, &data_type, cache)?;
            plan.push(ResolvedColumn {
                name: requested.name,
                data_type,
                nullable: true,
                source: ColumnSource::File(read),
                hidden: true,
            });
        }
        Ok(plan)
    }

    fn push(&mut self, column: ResolvedColumn) {
        self.index.insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
    }

    #[inline]
    pub fn columns(&self) -> &[ResolvedColumn] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedColumn> {
        self.index.get(name).map(|idx| &self.columns[*idx])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Columns that appear in the output.
    pub fn output_columns(&self) -> impl Iterator<Item = &ResolvedColumn> {
        self.columns.iter().filter(|c| !c.hidden)
    }

    /// Whether any column reads a nested file node.
    pub fn reads_complex(&self, schema: &FileSchema) -> bool {
        self.columns
            .iter()
            .filter_map(ResolvedColumn::file_node)
            .any(|node| schema.is_complex(node))
    }
}

fn resolve_column(
    schema: &FileSchema,
    request: &ScanRequest,
    column: &RequestedColumn,
    cache: &mut ConverterCache,
) -> Result<ResolvedColumn> {
    let resolved = |source| ResolvedColumn {
        name: column.name.clone(),
        data_type: column.data_type.clone(),
        nullable: column.nullable,
        source,
        hidden: false,
    };

    if let Some(value) = request.partition_values.get(&column.name) {
        if value.is_null() && !column.nullable {
            return Err(Error::schema_mismatch(
                &column.name,
                "null partition value for a non-nullable column",
            ));
        }
        return Ok(resolved(ColumnSource::Partition(value.clone())));
    }

    let file_name = request
        .column_renames
        .get(&column.name)
        .map_or(column.name.as_str(), String::as_str);
    match schema.root_by_name(file_name) {
        Some(node) => {
            let plan = build_plan(schema, node, &column.name, &column.data_type, cache)?;
            Ok(resolved(ColumnSource::File(plan)))
        }
        None => {
            let default = column.default.clone().filter(|d| !d.is_null());
            if default.is_none() && !column.nullable {
                return Err(Error::schema_mismatch(
                    &column.name,
                    "column is missing from the file and has no default",
                ));
            }
            Ok(resolved(ColumnSource::Missing(default)))
        }
    }
}

/// Natural decode type for a leaf given the type it will be converted to.
///
/// Byte arrays decode straight to the requested text or binary flavor so
/// unannotated strings need no second pass.
fn decoded_type(schema: &FileSchema, node: NodeId, target: &DataType) -> DataType {
    let file = schema.node(node);
    if file.physical_type == PhysicalType::ByteArray
        && !matches!(file.logical_type, LogicalType::Decimal { .. })
    {
        match target {
            DataType::Utf8 => return DataType::Utf8,
            DataType::Binary => return DataType::Binary,
            _ => {}
        }
    }
    schema.arrow_type(node)
}

fn build_plan(
    schema: &FileSchema,
    node: NodeId,
    path: &str,
    target: &DataType,
    cache: &mut ConverterCache,
) -> Result<ReadPlan> {
    let file = schema.node(node);
    match (file.is_complex(), target) {
        (false, _) => {
            if let LogicalType::Decimal { precision, .. } = file.logical_type
                && precision > colscan_expr::decimal::MAX_DECIMAL_PRECISION
            {
                return Err(Error::schema_mismatch(
                    path,
                    format!("decimal precision {precision} is not supported"),
                ));
            }
            let decoded = decoded_type(schema, node, target);
            let converter = cache.get_or_create(path, &decoded, target)?;
            Ok(ReadPlan::Leaf {
                node,
                decoded,
                converter,
                target: target.clone(),
            })
        }
        (true, DataType::List(field)) if file.logical_type == LogicalType::List => {
            let element = build_plan(
                schema,
                file.children[0],
                &format!("{path}.{}", field.name()),
                field.data_type(),
                cache,
            )?;
            Ok(ReadPlan::List {
                node,
                element: Box::new(element),
                field: Arc::clone(field),
            })
        }
        (true, DataType::Map(entries, sorted)) if file.logical_type == LogicalType::Map => {
            let DataType::Struct(kv) = entries.data_type() else {
                return Err(Error::schema_mismatch(path, "map entries must be a struct"));
            };
            if kv.len() != 2 {
                return Err(Error::schema_mismatch(path, "map entries must have two fields"));
            }
            let key = build_plan(
                schema,
                file.children[0],
                &format!("{path}.{}", kv[0].name()),
                kv[0].data_type(),
                cache,
            )?;
            let value = build_plan(
                schema,
                file.children[1],
                &format!("{path}.{}", kv[1].name()),
                kv[1].data_type(),
                cache,
            )?;
            Ok(ReadPlan::Map {
                node,
                key: Box::new(key),
                value: Box::new(value),
                entries: Arc::clone(entries),
                sorted: *sorted,
            })
        }
        (true, DataType::Struct(fields)) if file.logical_type == LogicalType::Struct => {
            struct_plan(schema, node, path, fields, cache)
        }
        (true, other) => Err(Error::schema_mismatch(
            path,
            format!("nested file column cannot be read as {other}"),
        )),
    }
}

fn struct_plan(
    schema: &FileSchema,
    node: NodeId,
    path: &str,
    fields: &Fields,
    cache: &mut ConverterCache,
) -> Result<ReadPlan> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let child_path = format!("{path}.{}", field.name());
        let child = match schema.child_by_name(node, field.name()) {
            Some(child) => Some(build_plan(schema, child, &child_path, field.data_type(), cache)?),
            None if field.is_nullable() => None,
            None => {
                return Err(Error::schema_mismatch(
                    child_path,
                    "non-nullable struct field is missing from the file",
                ));
            }
        };
        out.push((Arc::clone(field), child));
    }
    Ok(ReadPlan::Struct { node, fields: out })
}
