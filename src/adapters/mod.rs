//! Facades over the external collaborators: the Kafka admin protocol, the
//! topic resource store and the rebalancing service

pub mod kafka_admin;
pub mod rebalancer;
pub mod topic_store;
