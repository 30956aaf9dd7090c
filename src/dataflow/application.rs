//! The application runner: define -> freeze -> run.
//! One OS thread per `ApplicationModule`, bounded `crossbeam-channel`
//! broadcast queues (default depth 3) between push-triggered networks and
//! their consumers, with a relaxed-atomic data-loss counter per consumer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::dataflow::data_loss::DataLossCounter;
use crate::dataflow::module::{ModuleId, ModuleKind, ModuleTree};
use crate::dataflow::network::{NetworkId, TriggerType};
use crate::dataflow::node::{Direction, GraphBuilder, Node, NodeData, NodePayload};
use crate::error::{CoreError, Result};
use crate::user_type::{UserTypeTag, UserValue};
use crate::version::VersionNumber;

pub const DEFAULT_QUEUE_DEPTH: usize = 3;

/// One control-system-visible variable, as printed by `describe-variables`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VariableDescription {
    pub public_name: String,
    pub value_type: String,
    pub n_elements: usize,
    pub unit: String,
    pub description: String,
    pub readable: bool,
    pub writable: bool,
}

/// One pushed update: a version-stamped snapshot of a feeder's values,
/// cheap to clone so it can be broadcast to every consumer queue.
#[derive(Debug, Clone)]
pub struct Sample {
    pub version: VersionNumber,
    pub values: Vec<UserValue>,
}

/// Fans one feeder's pushes out to every consumer of its network. Uses
/// `try_send` rather than blocking: a full queue means the consumer
/// could not keep up, and the update is dropped and counted rather than
/// stalling the feeder.
pub struct BroadcastQueue {
    senders: Vec<Sender<Sample>>,
    /// The process-wide counter; every network's
    /// `BroadcastQueue` shares the one instance the owning `Application`
    /// created.
    loss_counter: DataLossCounter,
}

impl BroadcastQueue {
    pub fn new(n_consumers: usize, depth: usize, loss_counter: DataLossCounter) -> (Self, Vec<Receiver<Sample>>) {
        let mut senders = Vec::with_capacity(n_consumers);
        let mut receivers = Vec::with_capacity(n_consumers);
        for _ in 0..n_consumers {
            let (tx, rx) = bounded(depth);
            senders.push(tx);
            receivers.push(rx);
        }
        (BroadcastQueue { senders, loss_counter }, receivers)
    }

    pub fn publish(&self, sample: Sample) {
        for sender in &self.senders {
            if sender.try_send(sample.clone()).is_err() {
                self.loss_counter.record_loss();
            }
        }
    }

    pub fn loss_counter(&self) -> &DataLossCounter {
        &self.loss_counter
    }
}

/// Cooperative shutdown signal checked between iterations of every
/// module's `main_loop`. Modules are expected to poll
/// this rather than being forcibly killed.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    fn new() -> Self {
        ShutdownHandle { flag: Arc::new(AtomicBool::new(false)) }
    }

    /// Builds a standalone handle for tests that exercise a
    /// [`RunnableModule`] directly, without going through
    /// [`Application::run`].
    pub fn for_test() -> Self {
        ShutdownHandle::new()
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Implemented by every `ApplicationModule`; `main_loop` runs on its own
/// `std::thread` until `shutdown.is_requested()`.
pub trait RunnableModule: Send {
    fn main_loop(&mut self, shutdown: &ShutdownHandle) -> Result<()>;
}

/// Owns the node arena/network set (via [`GraphBuilder`]) and the module
/// hierarchy tree for one application, and drives the
/// define -> freeze -> run lifecycle.
pub struct Application {
    graph: Rc<RefCell<GraphBuilder>>,
    tree: ModuleTree,
    frozen: bool,
    queue_depth: usize,
    runnables: HashMap<ModuleId, Box<dyn RunnableModule>>,
    shutdown: ShutdownHandle,
    /// The one process-wide data-loss counter every `BroadcastQueue` this
    /// application materialises at freeze time shares.
    data_loss_counter: DataLossCounter,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Application {
            graph: Rc::new(RefCell::new(GraphBuilder::default())),
            tree: ModuleTree::new(name),
            frozen: false,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            runnables: HashMap::new(),
            shutdown: ShutdownHandle::new(),
            data_loss_counter: DataLossCounter::new(),
        }
    }

    pub fn data_loss_counter(&self) -> DataLossCounter {
        self.data_loss_counter.clone()
    }

    /// Builds a new [`BroadcastQueue`] sharing this application's
    /// process-wide data-loss counter, at this application's configured
    /// queue depth.
    pub fn new_broadcast_queue(&self, n_consumers: usize) -> (BroadcastQueue, Vec<Receiver<Sample>>) {
        BroadcastQueue::new(n_consumers, self.queue_depth, self.data_loss_counter.clone())
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn root(&self) -> ModuleId {
        self.tree.root()
    }

    pub fn tree(&mut self) -> &mut ModuleTree {
        &mut self.tree
    }

    pub fn add_module_group(&mut self, parent: ModuleId, name: impl Into<String>) -> ModuleId {
        self.tree.add_child(parent, name, ModuleKind::ModuleGroup)
    }

    pub fn add_variable_group(&mut self, parent: ModuleId, name: impl Into<String>) -> ModuleId {
        self.tree.add_child(parent, name, ModuleKind::VariableGroup)
    }

    /// Registers an `ApplicationModule`: a named tree node whose
    /// `main_loop` runs on its own thread once [`Application::run`] is
    /// called.
    pub fn add_application_module(
        &mut self,
        parent: ModuleId,
        name: impl Into<String>,
        runnable: Box<dyn RunnableModule>,
    ) -> ModuleId {
        let id = self.tree.add_child(parent, name, ModuleKind::ApplicationModule);
        self.runnables.insert(id, runnable);
        id
    }

    pub fn make_node(&self, data: NodeData) -> Node {
        Node::new(self.graph.clone(), data)
    }

    fn node_label(&self, id: crate::dataflow::node::NodeId) -> String {
        let builder = self.graph.borrow();
        let data = builder.arena.get(id);
        match &data.payload {
            NodePayload::Application { module, accessor_key } => {
                format!("{}/{}", self.tree.qualified_path(*module), accessor_key)
            }
            NodePayload::ControlSystem { public_name } => public_name.clone(),
            NodePayload::Device { device_alias, register_name } => {
                format!("{device_alias}:{register_name}")
            }
            NodePayload::Constant { .. } => "<constant>".to_string(),
            NodePayload::TriggerReceiver => "<trigger-receiver>".to_string(),
            NodePayload::TriggerProvider => "<trigger-provider>".to_string(),
        }
    }

    /// Validates every network's invariants without consuming the
    /// builder, so `check()` may be called repeatedly while the graph is
    /// still being assembled.
    pub fn check(&self) -> Result<()> {
        let builder = self.graph.borrow();
        for network in &builder.networks {
            network.check(|id| self.node_label(id))?;
        }
        Ok(())
    }

    pub fn dump(&self) -> String {
        let builder = self.graph.borrow();
        builder
        .networks
        .iter()
        .filter(|n| !n.is_empty())
        .map(|n| n.dump(|id| self.node_label(id)))
        .collect::<Vec<_>>()
        .join("\n")
    }

    /// Completes every non-empty, feeder-less network with a constant
    /// feeder of zero value.
    /// Idempotent: a network that already has a feeder, including one
    /// synthesized by an earlier call, is left untouched.
    fn synthesize_missing_feeders(&self) {
        let mut builder = self.graph.borrow_mut();
        let network_ids: Vec<NetworkId> = (0..builder.networks.len()).collect();
        for id in network_ids {
            let net = builder.network(id);
            if net.is_empty() || net.has_feeder() {
                continue;
            }
            let value_type = net.inferred_value_type();
            let n_elements = net.inferred_n_elements();
            let mut data = NodeData::constant(UserValue::zero_for(value_type)).with_n_elements(n_elements);
            data.direction = Direction::Feeding;
            data.owner_network = Some(id);
            let node_id = builder.arena.push(data.clone());
            builder.network_mut(id).add_node(node_id, data);
        }
    }

    /// `freeze()`: synthesizes any missing constant feeders, runs
    /// `check()`, and forbids further structural changes to the graph
    /// (new node metadata mutation is rejected once a node's
    /// `owner_network` is set, which happens as soon as it is connected
    /// — see [`Node::connect`]).
    pub fn freeze(&mut self) -> Result<()> {
        if self.frozen {
            return Err(CoreError::logic("application already frozen".to_string()));
        }
        self.synthesize_missing_feeders();
        self.check()?;
        self.frozen = true;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn network_trigger_type(&self, id: NetworkId) -> Result<TriggerType> {
        let builder = self.graph.borrow();
        builder.network(id).trigger_type(&|node_id| self.node_label(node_id))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Spawns every `ApplicationModule`'s `main_loop` on its own thread
    /// and blocks until all of them return. Call [`Application::shutdown`]
    /// from another thread (e.g. a signal handler) to ask them to stop.
    pub fn run(&mut self) -> Result<()> {
        if !self.frozen {
            return Err(CoreError::logic("run() called before freeze()".to_string()));
        }
        let shutdown = self.shutdown.clone();
        let mut handles: Vec<JoinHandle<Result<()>>> = Vec::new();
        for (id, mut runnable) in std::mem::take(&mut self.runnables) {
            let name = self.tree.qualified_path(id);
            let shutdown = shutdown.clone();
            handles.push(
                std::thread::Builder::new()
                .name(name)
                .spawn(move || runnable.main_loop(&shutdown))
                .map_err(|e| CoreError::runtime(format!("failed to spawn module thread: {e}")))?,
            );
        }
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(CoreError::runtime("module thread panicked".to_string()));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.request();
    }

    pub fn default_queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Every `ControlSystem`-tagged node across all networks, sorted by
    /// public name, for `describe-variables`. A node's
    /// direction within its network determines whether the control
    /// system may read it, write it, or (a feeder that is itself fed by
    /// the control system) both.
    pub fn control_system_variables(&self) -> Vec<VariableDescription> {
        let builder = self.graph.borrow();
        let mut out = Vec::new();
        for network in &builder.networks {
            for id in network.node_ids() {
                let data = builder.arena.get(id);
                if let NodePayload::ControlSystem { public_name } = &data.payload {
                    out.push(VariableDescription {
                            public_name: public_name.clone(),
                            value_type: data.value_type.to_string(),
                            n_elements: data.n_elements,
                            unit: data.unit.clone(),
                            description: data.description.clone(),
                            readable: data.direction == Direction::Consuming,
                            writable: data.direction == Direction::Feeding,
                    });
                }
            }
        }
        out.sort_by(|a, b| a.public_name.cmp(&b.public_name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_queue_counts_losses_past_capacity() {
        let counter = DataLossCounter::new();
        let (queue, receivers) = BroadcastQueue::new(1, 3, counter.clone());
        for i in 0..10i32 {
            queue.publish(Sample { version: VersionNumber::new(), values: vec![UserValue::Int32(i)] });
        }
        assert_eq!(receivers[0].len(), 3);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn broadcast_queue_fans_identical_versions_to_every_consumer() {
        let counter = DataLossCounter::new();
        let (queue, receivers) = BroadcastQueue::new(2, 3, counter.clone());
        for _ in 0..3 {
            queue.publish(Sample { version: VersionNumber::new(), values: vec![] });
        }
        let versions_a: Vec<u64> = receivers[0].try_iter().map(|s| s.version.value()).collect();
        let versions_b: Vec<u64> = receivers[1].try_iter().map(|s| s.version.value()).collect();
        assert_eq!(versions_a.len(), 3);
        assert_eq!(versions_a, versions_b);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn freeze_synthesizes_a_constant_feeder_for_a_feederless_network() {
        let mut app = Application::new("App");
        let root = app.root();
        let node = app.make_node(
            NodeData::application(root, "onlyConsumer").with_value_type(UserTypeTag::Int32),
        );
        let net_id = {
            let mut builder = app.graph.borrow_mut();
            let net_id = builder.new_network();
            builder.arena.get_mut(node.id).direction = Direction::Consuming;
            builder.arena.get_mut(node.id).owner_network = Some(net_id);
            let data = builder.arena.get(node.id).clone();
            builder.network_mut(net_id).add_node(node.id, data);
            net_id
        };
        app.freeze().expect("freeze should synthesize a constant feeder");
        assert_eq!(app.graph.borrow().network(net_id).len(), 2);
        assert!(matches!(
                app.network_trigger_type(net_id).unwrap(),
                TriggerType::PollingConsumer
        ));
    }

    #[test]
    fn application_shares_one_data_loss_counter_across_queues() {
        let app = Application::new("App");
        let (queue_a, _rx_a) = app.new_broadcast_queue(1);
        let (queue_b, _rx_b) = app.new_broadcast_queue(1);
        queue_a.publish(Sample { version: VersionNumber::new(), values: vec![] });
        assert_eq!(queue_b.loss_counter().get(), 0);
        assert_eq!(app.data_loss_counter().get(), 0);
    }
}
