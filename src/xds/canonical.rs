//! Deterministic protobuf encoding.
//!
//! prost writes `map` fields in `HashMap` iteration order, which changes from
//! one process (and one map instance) to the next. Messages that carry maps
//! are encoded here with every map entry written in key order; all other
//! fields still go through prost. Decoding the result with prost yields the
//! original message.

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::route::v3::{
    route, route_action::ClusterSpecifier, weighted_cluster::ClusterWeight, Route, RouteAction,
    RouteConfiguration, VirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager,
};
use envoy_types::pb::google::protobuf::{value::Kind, Any, ListValue, Struct, Value};
use prost::encoding::{encode_key, encode_varint, WireType};
use prost::Message;
use std::collections::HashMap;

/// Protobuf encoding with every map field written in key order.
pub trait CanonicalEncode {
    fn encode_canonical(&self, buf: &mut Vec<u8>);

    fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_canonical(&mut buf);
        buf
    }
}

/// Wrap a message into an `Any` using its canonical encoding.
pub fn pack_canonical<M: CanonicalEncode>(type_url: impl Into<String>, msg: &M) -> Any {
    Any { type_url: type_url.into(), value: msg.to_canonical_bytes() }
}

pub(crate) fn write_length_delimited(tag: u32, bytes: &[u8], buf: &mut Vec<u8>) {
    encode_key(tag, WireType::LengthDelimited, buf);
    encode_varint(bytes.len() as u64, buf);
    buf.extend_from_slice(bytes);
}

fn write_message<M: Message>(msg: &M, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&msg.encode_to_vec());
}

fn sorted<V>(map: &HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

/// `map<string, google.protobuf.Any>` at `tag`, in key order.
fn write_any_map(tag: u32, map: &HashMap<String, Any>, buf: &mut Vec<u8>) {
    for (key, value) in sorted(map) {
        let mut entry = Vec::new();
        prost::encoding::string::encode(1, key, &mut entry);
        prost::encoding::message::encode(2, value, &mut entry);
        write_length_delimited(tag, &entry, buf);
    }
}

impl CanonicalEncode for Struct {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        for (key, value) in sorted(&self.fields) {
            let mut entry = Vec::new();
            prost::encoding::string::encode(1, key, &mut entry);
            write_length_delimited(2, &value.to_canonical_bytes(), &mut entry);
            write_length_delimited(1, &entry, buf);
        }
    }
}

impl CanonicalEncode for ListValue {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        for value in &self.values {
            write_length_delimited(1, &value.to_canonical_bytes(), buf);
        }
    }
}

impl CanonicalEncode for Value {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        match &self.kind {
            Some(Kind::StructValue(s)) => write_length_delimited(5, &s.to_canonical_bytes(), buf),
            Some(Kind::ListValue(list)) => write_length_delimited(6, &list.to_canonical_bytes(), buf),
            _ => write_message(self, buf),
        }
    }
}

impl CanonicalEncode for ClusterWeight {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        write_message(&ClusterWeight { typed_per_filter_config: HashMap::new(), ..self.clone() }, buf);
        write_any_map(10, &self.typed_per_filter_config, buf);
    }
}

impl CanonicalEncode for WeightedCluster {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        write_message(&WeightedCluster { clusters: Vec::new(), ..self.clone() }, buf);
        for cluster in &self.clusters {
            write_length_delimited(1, &cluster.to_canonical_bytes(), buf);
        }
    }
}

impl CanonicalEncode for RouteAction {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        match &self.cluster_specifier {
            Some(ClusterSpecifier::WeightedClusters(weighted)) => {
                write_message(&RouteAction { cluster_specifier: None, ..self.clone() }, buf);
                write_length_delimited(3, &weighted.to_canonical_bytes(), buf);
            }
            _ => write_message(self, buf),
        }
    }
}

impl CanonicalEncode for Route {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        match &self.action {
            Some(route::Action::Route(action)) => {
                write_message(
                    &Route { action: None, typed_per_filter_config: HashMap::new(), ..self.clone() },
                    buf,
                );
                write_length_delimited(2, &action.to_canonical_bytes(), buf);
            }
            _ => write_message(&Route { typed_per_filter_config: HashMap::new(), ..self.clone() }, buf),
        }
        write_any_map(13, &self.typed_per_filter_config, buf);
    }
}

impl CanonicalEncode for VirtualHost {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        write_message(
            &VirtualHost { routes: Vec::new(), typed_per_filter_config: HashMap::new(), ..self.clone() },
            buf,
        );
        for route in &self.routes {
            write_length_delimited(3, &route.to_canonical_bytes(), buf);
        }
        write_any_map(15, &self.typed_per_filter_config, buf);
    }
}

impl CanonicalEncode for RouteConfiguration {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        write_message(
            &RouteConfiguration {
                virtual_hosts: Vec::new(),
                typed_per_filter_config: HashMap::new(),
                ..self.clone()
            },
            buf,
        );
        for vh in &self.virtual_hosts {
            write_length_delimited(2, &vh.to_canonical_bytes(), buf);
        }
        write_any_map(16, &self.typed_per_filter_config, buf);
    }
}

impl CanonicalEncode for HttpConnectionManager {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        match &self.route_specifier {
            Some(RouteSpecifier::RouteConfig(route_config)) => {
                write_message(&HttpConnectionManager { route_specifier: None, ..self.clone() }, buf);
                write_length_delimited(4, &route_config.to_canonical_bytes(), buf);
            }
            _ => write_message(self, buf),
        }
    }
}

impl CanonicalEncode for Cluster {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        write_message(&Cluster { typed_extension_protocol_options: HashMap::new(), ..self.clone() }, buf);
        write_any_map(36, &self.typed_extension_protocol_options, buf);
    }
}
