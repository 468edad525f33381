//! Marker types and id aliases for each entity in the data model.

use crate::common::id::Id;

pub struct Job;
pub type JobId = Id<Job>;

pub struct ComputeNode;
pub type ComputeNodeId = Id<ComputeNode>;

pub struct Switch;
pub type SwitchId = Id<Switch>;

pub struct SwitchPort;
pub type SwitchPortId = Id<SwitchPort>;

pub struct SecurityGroup;
pub type SecurityGroupId = Id<SecurityGroup>;

pub struct PortSelector;
pub type PortSelectorId = Id<PortSelector>;

pub struct ComputeNodeAllocation;
pub type AllocationId = Id<ComputeNodeAllocation>;

pub struct JobComputeNode;
pub type JobComputeNodeId = Id<JobComputeNode>;

pub struct JobStorageAccess;
pub type JobStorageAccessId = Id<JobStorageAccess>;
