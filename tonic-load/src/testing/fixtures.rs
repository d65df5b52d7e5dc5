//! Descriptors and message helpers shared by unit and integration tests.

#![allow(dead_code)]

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor, Value};
use prost_types::{
    field_descriptor_proto::{Label, Type},
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};

pub(crate) fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        json_name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn rpc(name: &str, client_streaming: bool, server_streaming: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.into()),
        input_type: Some(".test.v1.Ping".into()),
        output_type: Some(".test.v1.Ping".into()),
        client_streaming: Some(client_streaming),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

/// A pool holding `test.v1.Ping { string name = 1; int32 count = 2; }` and
/// the `test.v1.Echo` service with one method of each shape.
pub(crate) fn pool() -> DescriptorPool {
    let file = FileDescriptorProto {
        name: Some("test/v1/echo.proto".into()),
        package: Some("test.v1".into()),
        message_type: vec![DescriptorProto {
            name: Some("Ping".into()),
            field: vec![field("name", 1, Type::String), field("count", 2, Type::Int32)],
            ..Default::default()
        }],
        service: vec![ServiceDescriptorProto {
            name: Some("Echo".into()),
            method: vec![
                rpc("Unary", false, false),
                rpc("ClientStream", true, false),
                rpc("ServerStream", false, true),
                rpc("Bidi", true, true),
            ],
            ..Default::default()
        }],
        syntax: Some("proto3".into()),
        ..Default::default()
    };

    let set = FileDescriptorSet { file: vec![file] };
    DescriptorPool::decode(set.encode_to_vec().as_slice()).expect("valid descriptor set")
}

pub(crate) fn method(name: &str) -> MethodDescriptor {
    pool()
        .get_service_by_name("test.v1.Echo")
        .expect("service")
        .methods()
        .find(|m| m.name() == name)
        .expect("method")
}

pub(crate) fn ping_descriptor() -> MessageDescriptor {
    pool().get_message_by_name("test.v1.Ping").expect("message")
}

pub(crate) fn ping(name: &str) -> DynamicMessage {
    let mut message = DynamicMessage::new(ping_descriptor());
    message.set_field_by_name("name", Value::String(name.into()));
    message
}

pub(crate) fn name_of(message: &DynamicMessage) -> String {
    message
        .get_field_by_name("name")
        .and_then(|value| value.as_str().map(str::to_owned))
        .unwrap_or_default()
}
