use schemars::{JsonSchema, SchemaGenerator, schema::Schema};
use serde::{Deserialize, Serialize};

/// An opaque JSON blob, e.g. terraform output or a free-form status payload, whose shape is
/// not known ahead of time. Schemas for this type carry the Kubernetes passthrough extension
/// so the API server does not prune unrecognised fields.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(transparent)]
pub struct GenericMap(pub serde_json::Value);

impl JsonSchema for GenericMap {
    fn schema_name() -> String {
        "GenericMap".to_string()
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        use schemars::schema::InstanceType;
        use schemars::schema::SchemaObject;
        use serde_json::json;

        let schema_obj = SchemaObject {
            instance_type: Some(InstanceType::Object.into()),
            ..Default::default()
        };

        let mut raw = serde_json::to_value(&schema_obj).unwrap();
        let obj = raw.as_object_mut().unwrap();
        obj.insert(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            json!(true),
        );

        serde_json::from_value(raw).unwrap()
    }
}
