//! Pod readiness as reported by the cluster's StatefulSet.

use std::future::Future;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{Api, Client};
use tracing::debug;

use super::error::Result;

/// Replica counters and revisions of the StatefulSet backing the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatefulSetStatus {
    pub desired: i32,
    pub ready: i32,
    pub updated: i32,
    pub current_revision: Option<String>,
    pub update_revision: Option<String>,
}

impl StatefulSetStatus {
    /// All `expected` pods exist, are ready and run the latest revision.
    pub fn is_stable_at(&self, expected: u32) -> bool {
        let expected = i64::from(expected);
        i64::from(self.desired) == expected
            && i64::from(self.ready) == expected
            && i64::from(self.updated) == expected
            && self.current_revision == self.update_revision
    }
}

impl From<&StatefulSet> for StatefulSetStatus {
    fn from(sts: &StatefulSet) -> Self {
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        match &sts.status {
            Some(status) => Self {
                desired,
                ready: status.ready_replicas.unwrap_or(0),
                updated: status.updated_replicas.unwrap_or(0),
                current_revision: status.current_revision.clone(),
                update_revision: status.update_revision.clone(),
            },
            None => Self {
                desired,
                ..Self::default()
            },
        }
    }
}

/// Source of pod readiness.
pub trait PodStatusSource {
    fn statefulset_status(&self) -> impl Future<Output = Result<StatefulSetStatus>> + Send;
}

/// Reads the status of one StatefulSet through the Kubernetes API.
#[derive(Clone)]
pub struct KubeStatefulSetSource {
    api: Api<StatefulSet>,
    name: String,
}

impl KubeStatefulSetSource {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }
}

impl PodStatusSource for KubeStatefulSetSource {
    async fn statefulset_status(&self) -> Result<StatefulSetStatus> {
        let sts = self.api.get(&self.name).await?;
        let status = StatefulSetStatus::from(&sts);
        debug!(
            statefulset = %self.name,
            desired = status.desired,
            ready = status.ready,
            updated = status.updated,
            "StatefulSet status"
        );
        Ok(status)
    }
}
