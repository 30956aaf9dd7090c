//! Variable networks: the set of nodes connected by `>>`,
//! with exactly one feeder, validated once `Application::check()` runs.

use std::fmt::Write as _;

use crate::dataflow::node::{Direction, NodeData, NodeId, NodePayload, UpdateMode};
use crate::error::{CoreError, Result};
use crate::user_type::UserTypeTag;

pub type NetworkId = usize;

/// Derived, not declared: which of the
/// network's members is responsible for driving reads of the feeder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    /// The feeder pushes new data on its own cadence (e.g. a device
    /// interrupt, or an application module writing whenever it likes).
    Feeder,
    /// The feeder is poll-mode and undriven by an external trigger; its
    /// single poll-mode consumer performs one read per call.
    PollingConsumer,
    /// The feeder is poll-mode and gated by a `with_trigger`-attached
    /// external push network: the external push drives the read.
    External,
    /// Degenerate trigger-receiver network: a `TriggerProvider` feeder
    /// whose sole effect is waking a corresponding feeder network
    /// elsewhere, carrying no data of its own.
    None,
}

#[derive(Default)]
pub struct VariableNetwork {
    members: Vec<(NodeId, NodeData)>,
}

impl VariableNetwork {
    pub fn new() -> Self {
        VariableNetwork::default()
    }

    pub fn add_node(&mut self, id: NodeId, data: NodeData) {
        if let Some(slot) = self.members.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = data;
        } else {
            self.members.push((id, data));
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|(id, _)| *id).collect()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    fn feeders(&self) -> Vec<&(NodeId, NodeData)> {
        self.members
        .iter()
        .filter(|(_, data)| data.direction == Direction::Feeding)
        .collect()
    }

    fn consumers(&self) -> Vec<&(NodeId, NodeData)> {
        self.members
        .iter()
        .filter(|(_, data)| data.direction == Direction::Consuming)
        .collect()
    }

    pub fn has_feeder(&self) -> bool {
        !self.feeders().is_empty()
    }

    /// The value type a synthesized constant feeder should take: the
    /// first member's declared type that isn't the `Any` placeholder.
    pub fn inferred_value_type(&self) -> UserTypeTag {
        self.members
        .iter()
        .map(|(_, d)| d.value_type)
        .find(|t| *t != UserTypeTag::Any)
        .unwrap_or(UserTypeTag::Any)
    }

    pub fn inferred_n_elements(&self) -> usize {
        self.members.iter().map(|(_, d)| d.n_elements).max().unwrap_or(1)
    }

    /// Validates this network's invariants: exactly one feeder, all
    /// members share a compatible value type (or are `UserTypeTag::Any`)
    /// and element count, and the network has at least one consumer.
    pub fn check(&self, label: impl Fn(NodeId) -> String) -> Result<()> {
        if self.members.is_empty() {
            return Ok(());
        }

        let feeders = self.feeders();
        if feeders.len() > 1 {
            let names: Vec<String> = feeders.iter().map(|(id, _)| label(*id)).collect();
            return Err(CoreError::logic(format!(
                        "network has {} feeders, expected exactly one: {}",
                        feeders.len(),
                        names.join(", ")
            )));
        }
        if feeders.is_empty() {
            let names: Vec<String> = self.members.iter().map(|(id, _)| label(*id)).collect();
            return Err(CoreError::logic(format!(
                        "network has no feeder among: {}",
                        names.join(", ")
            )));
        }

        let consumers = self.consumers();
        if consumers.is_empty() {
            return Err(CoreError::logic(format!(
                        "network fed by {} has no consumers",
                        label(feeders[0].0)
            )));
        }

        let (feeder_id, feeder) = feeders[0];
        for (id, member) in &self.members {
            if *id == feeder_id {
                continue;
            }
            // Consumer lengths must equal the feeder's, or be zero for
            // trigger receivers.
            if member.n_elements != feeder.n_elements
            && !(member.n_elements == 0 && matches!(member.payload, NodePayload::TriggerReceiver))
            {
                return Err(CoreError::logic(format!(
                            "{} has {} elements but feeder {} has {}",
                            label(*id),
                            member.n_elements,
                            label(feeder_id),
                            feeder.n_elements
                )));
            }
            if member.value_type != UserTypeTag::Any
            && feeder.value_type != UserTypeTag::Any
            && member.value_type != feeder.value_type
            {
                return Err(CoreError::logic(format!(
                            "{} expects {:?} but feeder {} produces {:?}",
                            label(*id),
                            member.value_type,
                            label(feeder_id),
                            feeder.value_type
                )));
            }
        }

        self.trigger_type(&label)?;
        Ok(())
    }

    /// `getTriggerType(verbose)`: derives which party
    /// drives reads of the feeder. Fails if a poll-mode feeder without an
    /// external trigger has anything other than exactly one poll-mode
    /// consumer.
    pub fn trigger_type(&self, label: &impl Fn(NodeId) -> String) -> Result<TriggerType> {
        let Some((feeder_id, feeder)) = self.feeders().into_iter().next() else {
            return Ok(TriggerType::None);
        };
        if matches!(feeder.payload, NodePayload::TriggerProvider) {
            return Ok(TriggerType::None);
        }
        if feeder.external_trigger.is_some() {
            if feeder.update_mode == UpdateMode::Push {
                return Err(CoreError::logic(format!(
                            "{}: external trigger attached to a push feeder",
                            label(feeder_id)
                )));
            }
            return Ok(TriggerType::External);
        }
        match (&feeder.payload, feeder.update_mode) {
            (NodePayload::Constant { .. }, _) => Ok(TriggerType::PollingConsumer),
            (_, UpdateMode::Push) => Ok(TriggerType::Feeder),
            (_, UpdateMode::Poll) => {
                let poll_consumers = self
                .consumers()
                .into_iter()
                .filter(|(_, d)| d.update_mode == UpdateMode::Poll)
                .count();
                if poll_consumers == 1 {
                    Ok(TriggerType::PollingConsumer)
                } else {
                    Err(CoreError::logic(format!(
                                "{}: poll feeder without external trigger must have exactly one poll consumer, found {}",
                                label(feeder_id),
                                poll_consumers
                    )))
                }
            }
        }
    }

    pub fn dump(&self, label: impl Fn(NodeId) -> String) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "network ({} members):", self.members.len());
        for (id, data) in &self.members {
            let _ = writeln!(
                out,
                " {:?} {} [{:?}, {} elements]",
                data.direction,
                label(*id),
                data.value_type,
                data.n_elements
            );
        }
        out
    }
}
