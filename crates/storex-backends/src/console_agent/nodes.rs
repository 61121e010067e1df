//! Per-node details of a Gdas cluster: cache usage and disc array hardware.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, FutureExt as _, StreamExt as _, TryStreamExt as _};
use serde::Deserialize;
use storex::{
    client::{fetch_json, BackendClient, Method},
    CollectError, Collector, Descriptor, Sink,
};

use super::gauge;

const NODES_PATH: &str = "/api/gdas/node/list";
const NODE_CACHE_PATH: &str = "/api/gdas/cache/node";
const NODE_DAS_PATH: &str = "/api/gdas/das/node";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodesResponse {
    #[serde(default)]
    node_list: Vec<Node>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    #[serde(default)]
    dam_name: String,
    #[serde(default)]
    status: i64,
    ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheResponse {
    #[serde(default)]
    total_cache_size: i64,
    #[serde(default)]
    used_cache_size: i64,
    #[serde(default)]
    un_used_cache_size: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeDasResponse {
    #[serde(default)]
    da_list: Vec<NodeDa>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeDa {
    #[serde(default)]
    name: String,
    #[serde(rename = "da_no", default)]
    da_no: i64,
    #[serde(default)]
    magazine_used_count: i64,
    #[serde(default)]
    magazine_free_count: i64,
    #[serde(default)]
    magazine_excp_count: i64,
    #[serde(default)]
    changer_serial: String,
    #[serde(default)]
    changer_smart_info: Vec<SmartInfo>,
    #[serde(default)]
    drive_serial_list: Vec<DriveSerial>,
    #[serde(default)]
    drive_smart_info: Vec<SmartInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartInfo {
    #[serde(default)]
    used_percent: i64,
    #[serde(default)]
    status: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveSerial {
    #[serde(default)]
    drive_serial: String,
}

#[derive(Debug)]
struct NodeDetails {
    cache: CacheResponse,
    das: NodeDasResponse,
}

async fn fetch_node_details(
    client: &dyn BackendClient,
    node: &Node,
) -> Result<NodeDetails, CollectError> {
    let cache_path = format!("{NODE_CACHE_PATH}/{}", node.ip);
    let cache = fetch_json(client, Method::POST, &cache_path, None).await?;
    let das_path = format!("{NODE_DAS_PATH}/{}", node.ip);
    let das = fetch_json(client, Method::POST, &das_path, None).await?;
    Ok(NodeDetails { cache, das })
}

/// Reports cluster nodes with their cache usage, and the magazines, changers and drives of every
/// disc array attached to a node.
///
/// Node details are requested with bounded concurrency. The first failing node request fails
/// the collector.
#[derive(Debug)]
pub(super) struct NodesCollector {
    total_count: Arc<Descriptor>,
    status: Arc<Descriptor>,
    total_cache_size: Arc<Descriptor>,
    used_cache_size: Arc<Descriptor>,
    unused_cache_size: Arc<Descriptor>,
    magazine_used_count: Arc<Descriptor>,
    magazine_free_count: Arc<Descriptor>,
    magazine_excp_count: Arc<Descriptor>,
    changer_status: Arc<Descriptor>,
    changer_used_percent: Arc<Descriptor>,
    drive_status: Arc<Descriptor>,
    drive_used_percent: Arc<Descriptor>,
}

impl NodesCollector {
    const NODE_LABELS: &'static [&'static str] = &["dam_name", "ip"];
    const DA_LABELS: &'static [&'static str] = &["dam_name", "ip", "da_name", "da_no"];
    const CHANGER_LABELS: &'static [&'static str] =
        &["dam_name", "ip", "da_name", "da_no", "changer_serial"];
    const DRIVE_LABELS: &'static [&'static str] =
        &["dam_name", "ip", "da_name", "da_no", "drive_serial"];

    pub(super) fn new() -> Self {
        Self {
            total_count: gauge("gdas_node_total_count", "Number of nodes in the cluster", &[]),
            status: gauge("gdas_node_status", "Node status: 0 normal", Self::NODE_LABELS),
            total_cache_size: gauge(
                "gdas_node_total_cache_size",
                "Total cache size of the node, bytes",
                Self::NODE_LABELS,
            ),
            used_cache_size: gauge(
                "gdas_node_used_cache_size",
                "Used cache size of the node, bytes",
                Self::NODE_LABELS,
            ),
            unused_cache_size: gauge(
                "gdas_node_unused_cache_size",
                "Unused cache size of the node, bytes",
                Self::NODE_LABELS,
            ),
            magazine_used_count: gauge(
                "gdas_das_magazine_used_count",
                "Number of used magazines in the disc array",
                Self::DA_LABELS,
            ),
            magazine_free_count: gauge(
                "gdas_das_magazine_free_count",
                "Number of free magazines in the disc array",
                Self::DA_LABELS,
            ),
            magazine_excp_count: gauge(
                "gdas_das_magazine_excp_count",
                "Number of abnormal magazines in the disc array",
                Self::DA_LABELS,
            ),
            changer_status: gauge(
                "gdas_das_changer_status",
                "Changer status",
                Self::CHANGER_LABELS,
            ),
            changer_used_percent: gauge(
                "gdas_das_changer_used_percent",
                "Changer wear, percent",
                Self::CHANGER_LABELS,
            ),
            drive_status: gauge("gdas_das_drive_status", "Drive status", Self::DRIVE_LABELS),
            drive_used_percent: gauge(
                "gdas_das_drive_used_percent",
                "Drive wear, percent",
                Self::DRIVE_LABELS,
            ),
        }
    }

    fn emit_node(
        &self,
        sink: &Sink,
        node: &Node,
        details: &NodeDetails,
    ) -> Result<(), CollectError> {
        let node_labels: [&str; 2] = [&node.dam_name, &node.ip];
        sink.emit(&self.status, node.status as f64, node_labels)?;
        let cache = &details.cache;
        sink.emit(&self.total_cache_size, cache.total_cache_size as f64, node_labels)?;
        sink.emit(&self.used_cache_size, cache.used_cache_size as f64, node_labels)?;
        sink.emit(&self.unused_cache_size, cache.un_used_cache_size as f64, node_labels)?;

        for da in &details.das.da_list {
            let da_no = da.da_no.to_string();
            let da_labels: [&str; 4] = [&node.dam_name, &node.ip, &da.name, &da_no];
            sink.emit(&self.magazine_used_count, da.magazine_used_count as f64, da_labels)?;
            sink.emit(&self.magazine_free_count, da.magazine_free_count as f64, da_labels)?;
            sink.emit(&self.magazine_excp_count, da.magazine_excp_count as f64, da_labels)?;

            let changer_labels: [&str; 5] =
                [&node.dam_name, &node.ip, &da.name, &da_no, &da.changer_serial];
            for changer in &da.changer_smart_info {
                sink.emit(&self.changer_status, changer.status as f64, changer_labels)?;
                sink.emit(&self.changer_used_percent, changer.used_percent as f64, changer_labels)?;
            }

            if da.drive_serial_list.is_empty() {
                tracing::warn!(
                    node_ip = %node.ip,
                    da_name = %da.name,
                    "Disc array reports no drive serials; skipping drive metrics"
                );
                continue;
            }
            for (drive, serial) in da.drive_smart_info.iter().zip(&da.drive_serial_list) {
                let drive_labels: [&str; 5] =
                    [&node.dam_name, &node.ip, &da.name, &da_no, &serial.drive_serial];
                sink.emit(&self.drive_status, drive.status as f64, drive_labels)?;
                sink.emit(&self.drive_used_percent, drive.used_percent as f64, drive_labels)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for NodesCollector {
    fn name(&self) -> &'static str {
        "gdas_nodes_info"
    }

    fn help(&self) -> &'static str {
        "Gdas Nodes Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: NodesResponse = fetch_json(client, Method::POST, NODES_PATH, None).await?;
        let nodes = response.node_list;
        tracing::debug!(node_count = nodes.len(), "Fetched Gdas nodes from console agent");
        sink.emit_value(&self.total_count, nodes.len() as f64)?;

        let requests: Vec<_> = nodes
            .iter()
            .map(|node| fetch_node_details(client, node).boxed())
            .collect();
        let details: Vec<NodeDetails> = stream::iter(requests)
            .buffered(client.concurrency().max(1))
            .try_collect()
            .await?;
        for (node, details) in nodes.iter().zip(&details) {
            self.emit_node(sink, node, details)?;
        }
        Ok(())
    }
}
