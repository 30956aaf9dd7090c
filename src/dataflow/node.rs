//! Variable network nodes, arena-indexed per Design Notes:
//! "an arena of node descriptors with stable indices; every node is a
//! small value type holding an index into that arena."

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::dataflow::module::ModuleId;
use crate::dataflow::network::{NetworkId, VariableNetwork};
use crate::error::{CoreError, Result};
use crate::user_type::{UserTypeTag, UserValue};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Unspecified,
    Feeding,
    Consuming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Push,
    Poll,
}

#[derive(Debug, Clone)]
pub enum NodePayload {
    /// Endpoint owned by an application module; `accessor_key` names the
    /// accessor within that module so the runner can wire it at freeze
    /// time.
    Application { module: ModuleId, accessor_key: String },
    /// To be exported through the control-system adapter.
    ControlSystem { public_name: String },
    Device {
        device_alias: String,
        register_name: String,
    },
    /// A ready-made zero-arg accessor producing a fixed value.
    Constant { value: UserValue },
    TriggerReceiver,
    TriggerProvider,
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub payload: NodePayload,
    pub direction: Direction,
    pub update_mode: UpdateMode,
    pub value_type: UserTypeTag,
    pub unit: String,
    pub description: String,
    pub n_elements: usize,
    pub tags: HashSet<String>,
    pub owner_network: Option<NetworkId>,
    /// Memoised triggered copies, keyed by the trigger node's id.
    pub triggered_copies: HashMap<NodeId, NodeId>,
    /// Set on a feeder node copy produced by `with_trigger`: the id of
    /// the node whose network's pushes should wake this one's reads.
    pub external_trigger: Option<NodeId>,
}

impl NodeData {
    fn kind_name(&self) -> &'static str {
        match self.payload {
            NodePayload::Application { .. } => "Application",
            NodePayload::ControlSystem { .. } => "ControlSystem",
            NodePayload::Device { .. } => "Device",
            NodePayload::Constant { .. } => "Constant",
            NodePayload::TriggerReceiver => "TriggerReceiver",
            NodePayload::TriggerProvider => "TriggerProvider",
        }
    }

    /// A node with `payload`, `Unspecified` direction (inferred by the
    /// first `>>` it takes part in), and every other field at its
    /// construction-time default. Callers set `update_mode`/`value_type`/
    /// `n_elements`/metadata afterwards, or via the `with_*` chain
    /// methods below.
    pub fn new(payload: NodePayload) -> Self {
        NodeData {
            payload,
            direction: Direction::Unspecified,
            update_mode: UpdateMode::Poll,
            value_type: UserTypeTag::Any,
            unit: String::new(),
            description: String::new(),
            n_elements: 1,
            tags: HashSet::new(),
            owner_network: None,
            triggered_copies: HashMap::new(),
            external_trigger: None,
        }
    }

    pub fn application(module: ModuleId, accessor_key: impl Into<String>) -> Self {
        NodeData::new(NodePayload::Application { module, accessor_key: accessor_key.into() })
    }

    pub fn control_system(public_name: impl Into<String>) -> Self {
        NodeData::new(NodePayload::ControlSystem { public_name: public_name.into() })
    }

    pub fn device(device_alias: impl Into<String>, register_name: impl Into<String>) -> Self {
        NodeData::new(NodePayload::Device {
                device_alias: device_alias.into(),
                register_name: register_name.into(),
        })
    }

    pub fn constant(value: UserValue) -> Self {
        let value_type = value.tag();
        let mut data = NodeData::new(NodePayload::Constant { value });
        data.value_type = value_type;
        data
    }

    pub fn trigger_receiver() -> Self {
        NodeData::new(NodePayload::TriggerReceiver)
    }

    pub fn trigger_provider() -> Self {
        NodeData::new(NodePayload::TriggerProvider)
    }

    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    pub fn with_value_type(mut self, value_type: UserTypeTag) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_n_elements(mut self, n_elements: usize) -> Self {
        self.n_elements = n_elements;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

#[derive(Default)]
pub struct NodeArena {
    nodes: Vec<NodeData>,
}

impl NodeArena {
    pub fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(data);
        self.nodes.len() - 1
    }

    pub fn get(&self, id: NodeId) -> &NodeData {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Owns the node arena and the network set being assembled during
/// `defineConnections()`. Shared (via `Rc<RefCell<_>>`) by every [`Node`]
/// handle so `operator>>`-style connection can mutate shared state without
/// a cyclic ownership graph: networks and modules refer to nodes by
/// `NodeId`, never by back-pointer.
#[derive(Default)]
pub struct GraphBuilder {
    pub arena: NodeArena,
    pub networks: Vec<VariableNetwork>,
}

impl GraphBuilder {
    pub fn new_network(&mut self) -> NetworkId {
        self.networks.push(VariableNetwork::new());
        self.networks.len() - 1
    }

    pub fn network(&self, id: NetworkId) -> &VariableNetwork {
        &self.networks[id]
    }

    pub fn network_mut(&mut self, id: NetworkId) -> &mut VariableNetwork {
        &mut self.networks[id]
    }
}

/// A handle-shared variable network node: copying a `Node`
/// shares ownership of the same arena entry. Two nodes compare equal iff
/// they index the same descriptor in the same builder.
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    builder: Rc<RefCell<GraphBuilder>>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Rc::ptr_eq(&self.builder, &other.builder)
    }
}

impl Node {
    pub fn new(builder: Rc<RefCell<GraphBuilder>>, data: NodeData) -> Self {
        let id = builder.borrow_mut().arena.push(data);
        Node { id, builder }
    }

    pub fn builder(&self) -> Rc<RefCell<GraphBuilder>> {
        self.builder.clone()
    }

    pub fn direction(&self) -> Direction {
        self.builder.borrow().arena.get(self.id).direction
    }

    pub fn value_type(&self) -> UserTypeTag {
        self.builder.borrow().arena.get(self.id).value_type
    }

    pub fn n_elements(&self) -> usize {
        self.builder.borrow().arena.get(self.id).n_elements
    }

    pub fn update_mode(&self) -> UpdateMode {
        self.builder.borrow().arena.get(self.id).update_mode
    }

    pub fn is_application(&self) -> bool {
        matches!(
            self.builder.borrow().arena.get(self.id).payload,
            NodePayload::Application { .. }
        )
    }

    pub fn add_tag(&self, tag: impl Into<String>) -> Result<()> {
        self.require_application_and_unfrozen("addTag")?;
        self.builder
        .borrow_mut()
        .arena
        .get_mut(self.id)
        .tags
        .insert(tag.into());
        Ok(())
    }

    pub fn set_meta_data(&self, unit: impl Into<String>, description: impl Into<String>) -> Result<()> {
        self.require_application_and_unfrozen("setMetaData")?;
        let mut builder = self.builder.borrow_mut();
        let node = builder.arena.get_mut(self.id);
        node.unit = unit.into();
        node.description = description.into();
        Ok(())
    }

    pub fn set_value_type(&self, value_type: UserTypeTag) -> Result<()> {
        self.require_application_and_unfrozen("setValueType")?;
        self.builder.borrow_mut().arena.get_mut(self.id).value_type = value_type;
        Ok(())
    }

    fn require_application_and_unfrozen(&self, op: &str) -> Result<()> {
        let builder = self.builder.borrow();
        let node = builder.arena.get(self.id);
        if !matches!(node.payload, NodePayload::Application { .. }) {
            return Err(CoreError::logic(format!(
                        "{op} may only be called on Application nodes, got {}",
                        node.kind_name()
            )));
        }
        if node.owner_network.is_some() {
            return Err(CoreError::logic(format!(
                        "{op} called after the owning network was frozen"
            )));
        }
        Ok(())
    }

    /// `a[trigger]`: returns a node carrying the trigger relationship,
    /// memoised per distinct trigger so repeated calls with the same
    /// trigger share one triggered feed.
    pub fn with_trigger(&self, trigger: &Node) -> Node {
        {
            let builder = self.builder.borrow();
            if let Some(&existing) = builder.arena.get(self.id).triggered_copies.get(&trigger.id) {
                return Node { id: existing, builder: self.builder.clone() };
            }
        }
        let mut data = self.builder.borrow().arena.get(self.id).clone();
        // A triggered copy starts unconnected: it gets its own network
        // once `>>` is applied, independent of any network `self` already
        // belongs to.
        data.owner_network = None;
        data.external_trigger = Some(trigger.id);
        let copy = Node::new(self.builder.clone(), data);
        self.builder
        .borrow_mut()
        .arena
        .get_mut(self.id)
        .triggered_copies
        .insert(trigger.id, copy.id);
        copy
    }

    /// `a >> b`: connects two nodes, inferring missing directions (empty
    /// direction becomes feeding on the left, consuming on the right),
    /// then merges or creates the networks backing each side.
    pub fn connect(&self, other: &Node) -> Result<()> {
        if !Rc::ptr_eq(&self.builder, &other.builder) {
            return Err(CoreError::logic(
                    "cannot connect nodes from different applications".to_string(),
            ));
        }

        {
            let mut builder = self.builder.borrow_mut();
            let left_dir = builder.arena.get(self.id).direction;
            let right_dir = builder.arena.get(other.id).direction;
            if left_dir == Direction::Unspecified {
                builder.arena.get_mut(self.id).direction = Direction::Feeding;
            }
            if right_dir == Direction::Unspecified {
                builder.arena.get_mut(other.id).direction = Direction::Consuming;
            }
        }

        let left_dir = self.direction();
        let right_dir = other.direction();
        if left_dir == Direction::Feeding && right_dir == Direction::Feeding {
            return Err(CoreError::logic(format!(
                        "cannot connect two feeder nodes ({} and {})",
                        node_label(self),
                        node_label(other)
            )));
        }

        let left_net = self.network_id_or_create();
        let right_net = other.network_id_or_create();

        if left_net == right_net {
            self.builder.borrow_mut().network_mut(left_net).add_node(self.id, self.builder.borrow().arena.get(self.id).clone());
            return Ok(());
        }

        self.merge_networks(left_net, right_net)
    }

    fn network_id_or_create(&self) -> NetworkId {
        let existing = self.builder.borrow().arena.get(self.id).owner_network;
        if let Some(id) = existing {
            return id;
        }
        let net_id = self.builder.borrow_mut().new_network();
        self.builder.borrow_mut().arena.get_mut(self.id).owner_network = Some(net_id);
        let data = self.builder.borrow().arena.get(self.id).clone();
        self.builder.borrow_mut().network_mut(net_id).add_node(self.id, data);
        net_id
    }

    fn merge_networks(&self, into: NetworkId, from: NetworkId) -> Result<()> {
        let members: Vec<NodeId> = {
            let builder = self.builder.borrow();
            builder.network(from).node_ids().to_vec()
        };
        for member in members {
            let data = self.builder.borrow().arena.get(member).clone();
            self.builder.borrow_mut().arena.get_mut(member).owner_network = Some(into);
            self.builder.borrow_mut().network_mut(into).add_node(member, data);
        }
        self.builder.borrow_mut().network_mut(from).clear();
        Ok(())
    }
}

fn node_label(node: &Node) -> String {
    let builder = node.builder.borrow();
    let data = builder.arena.get(node.id);
    match &data.payload {
        NodePayload::Application { accessor_key, .. } => format!("Application({accessor_key})"),
        NodePayload::ControlSystem { public_name } => format!("ControlSystem({public_name})"),
        NodePayload::Device { device_alias, register_name } => {
            format!("Device({device_alias}/{register_name})")
        }
        NodePayload::Constant { .. } => "Constant".to_string(),
        NodePayload::TriggerReceiver => "TriggerReceiver".to_string(),
        NodePayload::TriggerProvider => "TriggerProvider".to_string(),
    }
}
