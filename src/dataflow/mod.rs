//! The dataflow engine: variable-network nodes,
//! networks, the module hierarchy, and the application runner that turns
//! a frozen graph into running threads.

pub mod application;
pub mod data_loss;
pub mod materialize;
pub mod module;
pub mod network;
pub mod node;

pub use application::{
    Application, RunnableModule, Sample, ShutdownHandle, VariableDescription, DEFAULT_QUEUE_DEPTH,
};
pub use data_loss::{DataLossCounter, DataLossSamplerModule};
pub use materialize::{
    ControlSystemSinkModule, DeviceFeederModule, DeviceHandle, DeviceRegistry, PolledDeviceSource,
    register_control_system_variable,
};
pub use module::{AccessorSlot, HierarchyModifier, ModuleId, ModuleKind, ModuleTree};
pub use network::{NetworkId, TriggerType, VariableNetwork};
pub use node::{Direction, Node, NodeData, NodeId, NodePayload, UpdateMode};
