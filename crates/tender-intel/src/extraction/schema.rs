//! Record shapes and their compiled extraction contracts
//!
//! A [`RecordShape`] describes the output record as a tree of typed fields.
//! [`SchemaCompiler`] walks that tree once to produce the function-call
//! contract handed to the generation service and the all-empty skeleton the
//! accumulation engine starts from. [`conform`] walks it again at the end to
//! materialize an aggregate into the declared shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Declared type of a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// String restricted to a closed set of values
    Enumeration(Vec<String>),
    /// Nested record
    Nested(RecordShape),
    /// Sequence of elements of the inner kind
    List(Box<FieldKind>),
    /// Free-form string-keyed mapping
    Mapping,
}

impl FieldKind {
    pub fn list_of(inner: FieldKind) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enumeration(values.into_iter().map(Into::into).collect())
    }

    /// Scalars follow the "more informative value wins" merge rule
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Integer | Self::Number | Self::Enumeration(_)
        )
    }
}

/// One field of a record shape
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declarative description of an output record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordShape {
    name: String,
    fields: Vec<FieldSpec>,
}

impl RecordShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field, replacing any earlier field with the same name in place
    pub fn field(mut self, spec: FieldSpec) -> Self {
        match self.fields.iter_mut().find(|f| f.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.fields.push(spec),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Callable extraction contract in function-calling form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionContract {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Output of [`SchemaCompiler::compile`]
#[derive(Debug, Clone)]
pub struct CompiledShape {
    pub shape: RecordShape,
    pub contract: ExtractionContract,
    pub skeleton: Map<String, Value>,
}

/// Compiles record shapes into contracts and skeletons
pub struct SchemaCompiler;

impl SchemaCompiler {
    pub fn compile(
        shape: &RecordShape,
        function_name: impl Into<String>,
        function_description: impl Into<String>,
    ) -> CompiledShape {
        CompiledShape {
            shape: shape.clone(),
            contract: Self::contract(shape, function_name, function_description),
            skeleton: Self::skeleton(shape),
        }
    }

    pub fn contract(
        shape: &RecordShape,
        function_name: impl Into<String>,
        function_description: impl Into<String>,
    ) -> ExtractionContract {
        ExtractionContract {
            name: function_name.into(),
            description: function_description.into(),
            parameters: object_schema(shape),
        }
    }

    /// All-empty instance of the shape
    pub fn skeleton(shape: &RecordShape) -> Map<String, Value> {
        shape
            .fields()
            .iter()
            .map(|f| (f.name.clone(), empty_value(&f.kind)))
            .collect()
    }
}

fn object_schema(shape: &RecordShape) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in shape.fields() {
        let mut schema = kind_schema(&field.kind);
        if let (Some(description), Value::Object(obj)) = (&field.description, &mut schema) {
            obj.insert("description".to_string(), Value::String(description.clone()));
        }
        properties.insert(field.name.clone(), schema);
        if field.required {
            required.push(Value::String(field.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn kind_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String => json!({ "type": "string" }),
        FieldKind::Integer => json!({ "type": "integer" }),
        FieldKind::Number => json!({ "type": "number" }),
        FieldKind::Boolean => json!({ "type": "boolean" }),
        FieldKind::Enumeration(values) => json!({ "type": "string", "enum": values }),
        FieldKind::Nested(shape) => object_schema(shape),
        FieldKind::List(inner) => json!({ "type": "array", "items": kind_schema(inner) }),
        FieldKind::Mapping => json!({ "type": "object", "additionalProperties": true }),
    }
}

/// Skeleton value of a field kind
pub fn empty_value(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::Nested(shape) => Value::Object(SchemaCompiler::skeleton(shape)),
        FieldKind::List(_) => Value::Array(Vec::new()),
        FieldKind::Mapping => Value::Object(Map::new()),
        FieldKind::Boolean => Value::Bool(false),
        _ => Value::Null,
    }
}

/// Materialize an aggregate into the declared shape
///
/// Unknown keys are dropped, enumeration values are matched case-insensitively
/// (values outside the set become null), numeric strings are parsed and every
/// field the aggregate never populated keeps its skeleton value.
pub fn conform(shape: &RecordShape, data: &Map<String, Value>) -> Map<String, Value> {
    shape
        .fields()
        .iter()
        .map(|field| {
            let value = match data.get(&field.name) {
                Some(v) => conform_value(&field.kind, v),
                None => empty_value(&field.kind),
            };
            (field.name.clone(), value)
        })
        .collect()
}

fn conform_value(kind: &FieldKind, value: &Value) -> Value {
    if value.is_null() {
        return empty_value(kind);
    }

    match kind {
        FieldKind::String => match value {
            Value::String(_) => value.clone(),
            Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
            other => Value::String(text_of(other)),
        },
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
            Value::Number(n) => n
                .as_f64()
                .map(|f| json!(f.round() as i64))
                .unwrap_or(Value::Null),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| json!(i))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        FieldKind::Number => match value {
            Value::Number(_) => value.clone(),
            Value::String(s) => s
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::String(s) => Value::Bool(s.trim().eq_ignore_ascii_case("true")),
            _ => Value::Bool(false),
        },
        FieldKind::Enumeration(values) => {
            let raw = text_of(value);
            let raw = raw.trim();
            values
                .iter()
                .find(|v| v.eq_ignore_ascii_case(raw))
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null)
        }
        FieldKind::Nested(shape) => match value {
            Value::Object(obj) => Value::Object(conform(shape, obj)),
            _ => empty_value(kind),
        },
        FieldKind::List(inner) => match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| conform_value(inner, item))
                    .filter(|item| !item.is_null())
                    .collect(),
            ),
            single => {
                let item = conform_value(inner, single);
                Value::Array(if item.is_null() { Vec::new() } else { vec![item] })
            }
        },
        FieldKind::Mapping => match value {
            Value::Object(_) => value.clone(),
            _ => empty_value(kind),
        },
    }
}

/// Text rendering of a JSON value, strings without quotes
pub fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_shape() -> RecordShape {
        let tags = RecordShape::new("Tags")
            .field(FieldSpec::required("technology_stack", FieldKind::list_of(FieldKind::String)));
        RecordShape::new("Detail")
            .field(FieldSpec::required("title", FieldKind::String).describe("Tender title"))
            .field(FieldSpec::optional("score", FieldKind::Number))
            .field(FieldSpec::optional("is_framework", FieldKind::Boolean))
            .field(FieldSpec::optional(
                "size",
                FieldKind::enumeration(["xs", "s", "m", "l", "xl"]),
            ))
            .field(FieldSpec::optional("tags", FieldKind::Nested(tags)))
            .field(FieldSpec::required("keywords", FieldKind::list_of(FieldKind::String)))
            .field(FieldSpec::optional("extra", FieldKind::Mapping))
    }

    #[test]
    fn test_contract_mirrors_shape() {
        let contract = SchemaCompiler::contract(&sample_shape(), "extract", "Extract data");
        assert_eq!(contract.name, "extract");

        let params = &contract.parameters;
        assert_eq!(params["type"], "object");
        assert_eq!(params["properties"]["title"]["type"], "string");
        assert_eq!(params["properties"]["title"]["description"], "Tender title");
        assert_eq!(params["properties"]["score"]["type"], "number");
        assert_eq!(params["properties"]["size"]["enum"][4], "xl");
        assert_eq!(params["properties"]["keywords"]["items"]["type"], "string");
        assert_eq!(params["properties"]["extra"]["additionalProperties"], true);
        assert_eq!(
            params["properties"]["tags"]["properties"]["technology_stack"]["type"],
            "array"
        );
        assert_eq!(params["required"], json!(["title", "keywords"]));
        assert_eq!(params["properties"]["tags"]["required"], json!(["technology_stack"]));
    }

    #[test]
    fn test_list_of_nested_shape_compiles_item_schema() {
        let lot = RecordShape::new("Lot").field(FieldSpec::required("lot_id", FieldKind::String));
        let shape = RecordShape::new("Tender")
            .field(FieldSpec::optional("lots", FieldKind::list_of(FieldKind::Nested(lot))));
        let contract = SchemaCompiler::contract(&shape, "f", "d");
        let items = &contract.parameters["properties"]["lots"]["items"];
        assert_eq!(items["type"], "object");
        assert_eq!(items["properties"]["lot_id"]["type"], "string");
    }

    #[test]
    fn test_skeleton_defaults() {
        let skeleton = SchemaCompiler::skeleton(&sample_shape());
        assert_eq!(skeleton["title"], Value::Null);
        assert_eq!(skeleton["score"], Value::Null);
        assert_eq!(skeleton["is_framework"], json!(false));
        assert_eq!(skeleton["keywords"], json!([]));
        assert_eq!(skeleton["extra"], json!({}));
        assert_eq!(skeleton["tags"], json!({ "technology_stack": [] }));
    }

    #[test]
    fn test_conform_drops_unknown_and_coerces() {
        let data = json!({
            "title": "Road repair",
            "score": "7,5",
            "size": "XL",
            "tags": { "technology_stack": ["asphalt"], "stray": 1 },
            "hallucinated": "value",
        });
        let conformed = conform(&sample_shape(), data.as_object().unwrap());

        assert!(!conformed.contains_key("hallucinated"));
        assert_eq!(conformed["score"], json!(7.5));
        assert_eq!(conformed["size"], "xl");
        assert_eq!(conformed["tags"], json!({ "technology_stack": ["asphalt"] }));
        assert_eq!(conformed["keywords"], json!([]));
        assert_eq!(conformed["is_framework"], json!(false));
    }

    #[test]
    fn test_conform_invalid_enum_becomes_null() {
        let data = json!({ "size": "gigantic" });
        let conformed = conform(&sample_shape(), data.as_object().unwrap());
        assert_eq!(conformed["size"], Value::Null);
    }

    #[test]
    fn test_later_field_replaces_earlier() {
        let shape = RecordShape::new("S")
            .field(FieldSpec::optional("a", FieldKind::String).describe("english"))
            .field(FieldSpec::optional("b", FieldKind::Number))
            .field(FieldSpec::optional("a", FieldKind::String).describe("czech"));
        assert_eq!(shape.fields().len(), 2);
        assert_eq!(shape.fields()[0].description.as_deref(), Some("czech"));
    }
}
