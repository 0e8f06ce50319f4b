//! In-memory Valkey cluster for functional tests.
//!
//! `MockCluster` implements the driver traits and the pod status source on
//! top of a small simulated cluster. Every command converges instantly, so
//! the orchestrator's first poll after a mutation already sees the result.
//!
//! ## Design Philosophy
//!
//! The mock only simulates external state (membership, roles, slot
//! ownership). Replies are rendered as the text Valkey would send, so the
//! production parsers run on every query.
//!
//! `rebalance` follows the cluster manager: each master's share comes from
//! its weight, and masters over their share hand their lowest slots to the
//! ones below it. The result is balanced but rarely contiguous.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use valkey_scaler::client::{ClusterMutator, PeerQuery, RebalanceOptions, SlotMove, ValkeyError};
use valkey_scaler::orchestrator::{PodStatusSource, StatefulSetStatus};
use valkey_scaler::slots::{SlotBitset, SlotRange, TOTAL_SLOTS, desired_slot_ranges};
use valkey_scaler::topology::{Address, ClusterTopology, PodNaming, parse_cluster_topology};

/// Mutations and role checks, in the order they reached the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Create { ordinals: Vec<u32> },
    AddNode { ordinal: u32 },
    DelNode { ordinal: u32 },
    Rebalance { drained: Vec<u32> },
    Replicate { ordinal: u32, master: u32 },
    Failover { ordinal: u32 },
    RoleObserved { ordinal: u32 },
    Migrate { source: u32, destination: u32, slots: u32 },
    AddSlots { ordinal: u32, slots: u32 },
}

impl Op {
    fn is_slot_move(&self) -> bool {
        matches!(self, Op::Migrate { .. } | Op::AddSlots { .. })
    }
}

#[derive(Debug, Clone)]
struct SimNode {
    id: String,
    address: Address,
    master_id: Option<String>,
    slots: SlotBitset,
}

impl SimNode {
    fn is_master(&self) -> bool {
        self.master_id.is_none()
    }
}

#[derive(Debug)]
struct SimState {
    naming: PodNaming,
    pods: u32,
    ready_pods: u32,
    members: BTreeMap<u32, SimNode>,
    next_id: u64,
    ops: Vec<Op>,
}

impl SimState {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:040x}", self.next_id)
    }

    fn ordinal_of(&self, address: &Address) -> Result<u32, ValkeyError> {
        address
            .index()
            .filter(|ordinal| *ordinal < self.pods)
            .ok_or_else(|| ValkeyError::Connection(format!("no pod behind {address}")))
    }

    fn ordinal_by_id(&self, id: &str) -> Option<u32> {
        self.members
            .iter()
            .find(|(_, node)| node.id == id)
            .map(|(ordinal, _)| *ordinal)
    }

    fn assigned(&self) -> usize {
        self.members.values().map(|n| n.slots.len()).sum()
    }

    fn render_line(&self, node: &SimNode, myself: bool) -> String {
        let role = if node.is_master() { "master" } else { "slave" };
        let flags = if myself {
            format!("myself,{role}")
        } else {
            role.to_string()
        };
        let mut line = format!(
            "{} {}@{} {} {} 0 0 1 connected",
            node.id,
            node.address,
            node.address.cluster_bus_port(),
            flags,
            node.master_id.as_deref().unwrap_or("-"),
        );
        for range in node.slots.ranges() {
            line.push(' ');
            line.push_str(&range.to_string());
        }
        line
    }

    fn command_error(command: &str, message: impl Into<String>) -> ValkeyError {
        ValkeyError::Command {
            command: format!("valkey-cli --cluster {command}"),
            status: "1".to_string(),
            stderr: message.into(),
        }
    }
}

/// Simulated cluster shared between the driver and the pod status source.
#[derive(Debug, Clone)]
pub struct MockCluster {
    state: Arc<Mutex<SimState>>,
}

impl MockCluster {
    /// No cluster yet, `pods` ready pods.
    pub fn empty(naming: &PodNaming, pods: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                naming: naming.clone(),
                pods,
                ready_pods: pods,
                members: BTreeMap::new(),
                next_id: 0,
                ops: Vec::new(),
            })),
        }
    }

    /// A settled cluster in the shard-contiguous layout.
    pub fn running(naming: &PodNaming, masters: u32, replicas_per_master: u32) -> Self {
        let block = replicas_per_master + 1;
        let cluster = Self::empty(naming, masters * block);
        for (shard, range) in (0..masters).zip(desired_slot_ranges(masters as usize)) {
            let master = shard * block;
            cluster.add_master(master, &[range]);
            for offset in 1..=replicas_per_master {
                cluster.add_replica(master + offset, master);
            }
        }
        cluster
    }

    /// Place a master owning `ranges` at `ordinal`.
    pub fn add_master(&self, ordinal: u32, ranges: &[SlotRange]) -> &Self {
        let mut state = self.state.lock().unwrap();
        let mut slots = SlotBitset::new();
        for range in ranges {
            slots.insert_range(*range);
        }
        let node = SimNode {
            id: state.new_id(),
            address: state.naming.address(ordinal),
            master_id: None,
            slots,
        };
        state.members.insert(ordinal, node);
        self
    }

    /// Place a replica of the master at `master` on `ordinal`.
    pub fn add_replica(&self, ordinal: u32, master: u32) -> &Self {
        let mut state = self.state.lock().unwrap();
        let master_id = state.members[&master].id.clone();
        let node = SimNode {
            id: state.new_id(),
            address: state.naming.address(ordinal),
            master_id: Some(master_id),
            slots: SlotBitset::new(),
        };
        state.members.insert(ordinal, node);
        self
    }

    /// Resize the StatefulSet; every pod comes up ready.
    pub fn set_pods(&self, pods: u32) {
        let mut state = self.state.lock().unwrap();
        state.pods = pods;
        state.ready_pods = pods;
    }

    pub fn set_ready_pods(&self, ready: u32) {
        self.state.lock().unwrap().ready_pods = ready;
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    /// Only the structural operations, without role observations.
    pub fn mutations(&self) -> Vec<Op> {
        self.ops()
            .into_iter()
            .filter(|op| !matches!(op, Op::RoleObserved { .. }))
            .collect()
    }

    /// Membership and role changes only, without slot moves.
    pub fn membership(&self) -> Vec<Op> {
        self.mutations()
            .into_iter()
            .filter(|op| !op.is_slot_move())
            .collect()
    }

    /// Slots moved by `CLUSTER SETSLOT` migrations, per `(source, destination)`.
    pub fn migrated(&self) -> Vec<(u32, u32, u32)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Migrate {
                    source,
                    destination,
                    slots,
                } => Some((source, destination, slots)),
                _ => None,
            })
            .collect()
    }

    /// Replica ordinals per master ordinal.
    pub fn replicas_per_master(&self) -> BTreeMap<u32, Vec<u32>> {
        let state = self.state.lock().unwrap();
        let mut shards: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (ordinal, node) in &state.members {
            match node.master_id.as_deref() {
                None => {
                    shards.entry(*ordinal).or_default();
                }
                Some(id) => {
                    let master = state.ordinal_by_id(id).unwrap();
                    shards.entry(master).or_default().push(*ordinal);
                }
            }
        }
        shards
    }

    pub fn member_ordinals(&self) -> Vec<u32> {
        self.state.lock().unwrap().members.keys().copied().collect()
    }

    /// The cluster as the lowest-ordinal member reports it.
    pub fn topology(&self) -> ClusterTopology {
        let state = self.state.lock().unwrap();
        let text: Vec<String> = state
            .members
            .values()
            .map(|node| state.render_line(node, false))
            .collect();
        parse_cluster_topology(&text.join("\n"))
    }
}

impl PeerQuery for MockCluster {
    async fn cluster_nodes(&self, node: &Address) -> Result<String, ValkeyError> {
        let state = self.state.lock().unwrap();
        let ordinal = state.ordinal_of(node)?;
        if !state.members.contains_key(&ordinal) {
            // A pod outside the cluster only knows itself.
            let lone = SimNode {
                id: format!("{:040x}", 0xfff0_0000_u64 + u64::from(ordinal)),
                address: state.naming.address(ordinal),
                master_id: None,
                slots: SlotBitset::new(),
            };
            return Ok(state.render_line(&lone, true));
        }
        let lines: Vec<String> = state
            .members
            .iter()
            .map(|(o, n)| state.render_line(n, *o == ordinal))
            .collect();
        Ok(lines.join("\n") + "\n")
    }

    async fn cluster_info(&self, node: &Address) -> Result<String, ValkeyError> {
        let state = self.state.lock().unwrap();
        let ordinal = state.ordinal_of(node)?;
        if !state.members.contains_key(&ordinal) {
            return Ok("cluster_state:fail\n\
                       cluster_slots_assigned:0\n\
                       cluster_slots_ok:0\n\
                       cluster_slots_pfail:0\n\
                       cluster_slots_fail:0\n\
                       cluster_known_nodes:1\n\
                       cluster_size:0\n\
                       cluster_current_epoch:0\n"
                .to_string());
        }
        let assigned = state.assigned();
        let cluster_state = if assigned == usize::from(TOTAL_SLOTS) {
            "ok"
        } else {
            "fail"
        };
        let size = state
            .members
            .values()
            .filter(|n| n.is_master() && !n.slots.is_empty())
            .count();
        Ok(format!(
            "cluster_state:{cluster_state}\n\
             cluster_slots_assigned:{assigned}\n\
             cluster_slots_ok:{assigned}\n\
             cluster_slots_pfail:0\n\
             cluster_slots_fail:0\n\
             cluster_known_nodes:{}\n\
             cluster_size:{size}\n\
             cluster_current_epoch:1\n",
            state.members.len(),
        ))
    }

    async fn replication_info(&self, node: &Address) -> Result<String, ValkeyError> {
        let mut state = self.state.lock().unwrap();
        let ordinal = state.ordinal_of(node)?;
        state.ops.push(Op::RoleObserved { ordinal });

        let master = state
            .members
            .get(&ordinal)
            .and_then(|n| n.master_id.as_deref())
            .and_then(|id| state.ordinal_by_id(id))
            .and_then(|o| state.members.get(&o));
        Ok(match master {
            Some(master) => format!(
                "# Replication\nrole:slave\nmaster_host:{}\nmaster_port:{}\nmaster_link_status:up\nslave_repl_offset:100\n",
                master.address.host, master.address.port
            ),
            None => "# Replication\nrole:master\nconnected_slaves:0\nmaster_repl_offset:100\n"
                .to_string(),
        })
    }
}

impl ClusterMutator for MockCluster {
    async fn ensure_available(&self) -> Result<(), ValkeyError> {
        Ok(())
    }

    async fn create_cluster(
        &self,
        nodes: &[Address],
        replicas_per_master: u32,
    ) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        if !state.members.is_empty() {
            return Err(SimState::command_error("create", "node is not empty"));
        }
        let ordinals = nodes
            .iter()
            .map(|n| state.ordinal_of(n))
            .collect::<Result<Vec<u32>, _>>()?;
        let masters = ordinals.len() / (replicas_per_master as usize + 1);
        if masters == 0 {
            return Err(SimState::command_error("create", "not enough nodes"));
        }

        let ranges = desired_slot_ranges(masters);
        let mut master_ids = Vec::new();
        for (ordinal, range) in ordinals.iter().zip(ranges) {
            let mut slots = SlotBitset::new();
            slots.insert_range(range);
            let id = state.new_id();
            master_ids.push(id.clone());
            let address = state.naming.address(*ordinal);
            state.members.insert(
                *ordinal,
                SimNode {
                    id,
                    address,
                    master_id: None,
                    slots,
                },
            );
        }
        for (i, ordinal) in ordinals.iter().skip(masters).enumerate() {
            let id = state.new_id();
            let address = state.naming.address(*ordinal);
            state.members.insert(
                *ordinal,
                SimNode {
                    id,
                    address,
                    master_id: Some(master_ids[i % masters].clone()),
                    slots: SlotBitset::new(),
                },
            );
        }
        state.ops.push(Op::Create { ordinals });
        Ok(())
    }

    async fn add_node(&self, new_node: &Address, via: &Address) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        let via = state.ordinal_of(via)?;
        let ordinal = state.ordinal_of(new_node)?;
        if !state.members.contains_key(&via) {
            return Err(SimState::command_error("add-node", "seed is not a member"));
        }
        if state.members.contains_key(&ordinal) {
            return Err(SimState::command_error("add-node", "node already belongs to a cluster"));
        }
        let node = SimNode {
            id: state.new_id(),
            address: state.naming.address(ordinal),
            master_id: None,
            slots: SlotBitset::new(),
        };
        state.members.insert(ordinal, node);
        state.ops.push(Op::AddNode { ordinal });
        Ok(())
    }

    async fn del_node(&self, via: &Address, node_id: &str) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        state.ordinal_of(via)?;
        let ordinal = state
            .ordinal_by_id(node_id)
            .ok_or_else(|| SimState::command_error("del-node", "no such node"))?;
        if !state.members[&ordinal].slots.is_empty() {
            return Err(SimState::command_error("del-node", "node is not empty"));
        }
        state.members.remove(&ordinal);
        state.ops.push(Op::DelNode { ordinal });
        Ok(())
    }

    async fn rebalance(&self, via: &Address, options: &RebalanceOptions) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        state.ordinal_of(via)?;

        let masters: Vec<u32> = state
            .members
            .iter()
            .filter(|(_, n)| n.is_master())
            .map(|(o, _)| *o)
            .collect();
        let drained: Vec<u32> = masters
            .iter()
            .copied()
            .filter(|o| options.weight_of(&state.members[o].id) == 0)
            .collect();
        let receivers: Vec<u32> = masters
            .iter()
            .copied()
            .filter(|o| {
                let node = &state.members[o];
                options.weight_of(&node.id) > 0
                    && (options.use_empty_masters || !node.slots.is_empty())
            })
            .collect();
        if receivers.is_empty() {
            return Err(SimState::command_error("rebalance", "no master can take slots"));
        }

        // Target share per receiver; drained masters keep nothing.
        let mut balance: BTreeMap<u32, i64> = BTreeMap::new();
        for (ordinal, range) in receivers.iter().zip(desired_slot_ranges(receivers.len())) {
            let have = state.members[ordinal].slots.len() as i64;
            balance.insert(*ordinal, have - i64::from(range.count()));
        }
        for ordinal in &drained {
            balance.insert(*ordinal, state.members[ordinal].slots.len() as i64);
        }

        let mut pool: Vec<u16> = Vec::new();
        for (ordinal, surplus) in &balance {
            if *surplus > 0 {
                let node = state.members.get_mut(ordinal).unwrap();
                let given: Vec<u16> = node.slots.iter().take(*surplus as usize).collect();
                for slot in &given {
                    node.slots.remove(*slot);
                }
                pool.extend(given);
            }
        }
        let mut pool = pool.into_iter();
        for (ordinal, surplus) in &balance {
            if *surplus < 0 {
                let node = state.members.get_mut(ordinal).unwrap();
                for slot in pool.by_ref().take(surplus.unsigned_abs() as usize) {
                    node.slots.insert(slot);
                }
            }
        }
        state.ops.push(Op::Rebalance { drained });
        Ok(())
    }

    async fn replicate(&self, replica: &Address, master_id: &str) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        let ordinal = state.ordinal_of(replica)?;
        let master = state
            .ordinal_by_id(master_id)
            .filter(|o| state.members[o].is_master())
            .ok_or_else(|| ValkeyError::Rejected(format!("unknown master {master_id}")))?;
        let node = state
            .members
            .get_mut(&ordinal)
            .ok_or_else(|| ValkeyError::Rejected("replica is not a member".to_string()))?;
        if !node.slots.is_empty() {
            return Err(ValkeyError::Rejected(
                "a master with slots cannot become a replica".to_string(),
            ));
        }
        node.master_id = Some(master_id.to_string());
        state.ops.push(Op::Replicate { ordinal, master });
        Ok(())
    }

    async fn failover(&self, replica: &Address) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        let ordinal = state.ordinal_of(replica)?;
        let old_master_id = state
            .members
            .get(&ordinal)
            .and_then(|n| n.master_id.clone())
            .ok_or_else(|| ValkeyError::Rejected("failover on a master".to_string()))?;
        let old_ordinal = state
            .ordinal_by_id(&old_master_id)
            .ok_or_else(|| ValkeyError::Rejected("master is gone".to_string()))?;
        let new_id = state.members[&ordinal].id.clone();

        let slots = std::mem::take(&mut state.members.get_mut(&old_ordinal).unwrap().slots);
        for node in state.members.values_mut() {
            if node.master_id.as_deref() == Some(old_master_id.as_str()) {
                node.master_id = Some(new_id.clone());
            }
        }
        let promoted = state.members.get_mut(&ordinal).unwrap();
        promoted.master_id = None;
        promoted.slots = slots;
        state.members.get_mut(&old_ordinal).unwrap().master_id = Some(new_id);
        state.ops.push(Op::Failover { ordinal });
        Ok(())
    }

    async fn migrate_slots(&self, slot_move: &SlotMove) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        let source = state.ordinal_of(&slot_move.source)?;
        let destination = state.ordinal_of(&slot_move.destination)?;
        let ids_match = state.members.get(&source).is_some_and(|n| n.id == slot_move.source_id)
            && state
                .members
                .get(&destination)
                .is_some_and(|n| n.id == slot_move.destination_id && n.is_master());
        if !ids_match {
            return Err(ValkeyError::Rejected("unknown node id in SETSLOT".to_string()));
        }
        if !slot_move
            .range
            .iter()
            .all(|slot| state.members[&source].slots.contains(slot))
        {
            return Err(ValkeyError::Rejected(format!(
                "source does not own every slot of {}",
                slot_move.range
            )));
        }

        for slot in slot_move.range.iter() {
            state.members.get_mut(&source).unwrap().slots.remove(slot);
            state.members.get_mut(&destination).unwrap().slots.insert(slot);
        }
        state.ops.push(Op::Migrate {
            source,
            destination,
            slots: slot_move.range.count(),
        });
        Ok(())
    }

    async fn add_slots(&self, node: &Address, range: SlotRange) -> Result<(), ValkeyError> {
        let mut state = self.state.lock().unwrap();
        let ordinal = state.ordinal_of(node)?;
        if range
            .iter()
            .any(|slot| state.members.values().any(|n| n.slots.contains(slot)))
        {
            return Err(ValkeyError::Rejected(format!("slots of {range} are already busy")));
        }
        let member = state
            .members
            .get_mut(&ordinal)
            .filter(|n| n.is_master())
            .ok_or_else(|| ValkeyError::Rejected("ADDSLOTS on a non-master".to_string()))?;
        member.slots.insert_range(range);
        state.ops.push(Op::AddSlots {
            ordinal,
            slots: range.count(),
        });
        Ok(())
    }
}

impl PodStatusSource for MockCluster {
    async fn statefulset_status(&self) -> valkey_scaler::Result<StatefulSetStatus> {
        let state = self.state.lock().unwrap();
        let pods = i32::try_from(state.pods).unwrap();
        let ready = i32::try_from(state.ready_pods).unwrap();
        Ok(StatefulSetStatus {
            desired: pods,
            ready,
            updated: ready,
            current_revision: Some("rev-1".to_string()),
            update_revision: Some("rev-1".to_string()),
        })
    }
}
