//! Schema helpers for fields the API server must not prune
//!
//! A structural schema drops every field it does not declare. Raw manifests
//! and specs of resources this controller only partly models are marked with
//! `x-kubernetes-preserve-unknown-fields` so they are stored as written.

use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;

use super::hosted_cluster::{HostedClusterSpec, NodePoolSpec};

const PRESERVE_UNKNOWN_FIELDS: &str = "x-kubernetes-preserve-unknown-fields";

fn preserve_unknown(schema: &mut SchemaObject) {
    schema
        .extensions
        .insert(PRESERVE_UNKNOWN_FIELDS.to_string(), serde_json::Value::Bool(true));
}

fn free_form_object() -> SchemaObject {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    preserve_unknown(&mut schema);
    schema
}

/// List of arbitrary objects, each kept verbatim
pub fn free_form_list(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(free_form_object()).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}

/// Typed schema of `T` that still keeps fields it does not declare
fn open_schema<T: JsonSchema>(gen: &mut SchemaGenerator) -> Schema {
    match gen.subschema_for::<T>() {
        Schema::Object(mut schema) => {
            preserve_unknown(&mut schema);
            Schema::Object(schema)
        }
        Schema::Bool(_) => Schema::Object(free_form_object()),
    }
}

/// Inline HostedCluster spec
pub fn open_hosted_cluster_spec(gen: &mut SchemaGenerator) -> Schema {
    open_schema::<HostedClusterSpec>(gen)
}

/// Inline NodePool spec
pub fn open_node_pool_spec(gen: &mut SchemaGenerator) -> Schema {
    open_schema::<NodePoolSpec>(gen)
}
